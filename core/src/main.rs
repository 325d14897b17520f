/// Inbox demo - two participants talking through an in-process store
use colored::*;
use inbox_core::local_store::{LocalStore, ProfileCache};
use inbox_core::model::{Identity, ListingContext, Profile};
use inbox_core::store::DocumentStore;
use inbox_core::{Config, Inbox, MemoryStore};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let data_dir = config.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let cache = ProfileCache::new(LocalStore::new(&data_dir)?);

    let memory = MemoryStore::new();
    let store: Arc<dyn DocumentStore> = Arc::new(memory.clone());

    let host_id = config.counterpart_id.clone();
    memory
        .put_profile(Profile {
            participant_id: host_id.clone(),
            display_name: format!("Host {}", host_id),
            photo_url: None,
        })
        .await;

    let me = Identity::new(config.participant_id.clone(), config.display_name.clone());
    let guest = Inbox::new(store.clone(), me, config.clone())?.with_profile_cache(cache);

    let host_config = Config {
        typing_idle_timeout: config.typing_idle_timeout,
        ..Config::for_participant(host_id.clone())
    };
    let host = Inbox::new(
        store.clone(),
        Identity::new(host_id.clone(), format!("Host {}", host_id)),
        host_config,
    )?;

    info!("Starting inbox demo");
    info!("   Participant: {}", config.participant_id);
    info!("   Counterpart: {}", host_id);

    guest.start().await?;
    host.start().await?;

    let listing = config.listing.as_ref().map(|id| {
        ListingContext::new(id.clone(), format!("Listing {}", id)).with_host(host_id.clone())
    });
    let conversation = guest.open_conversation_with(&host_id, listing).await?;
    host.select(&conversation.id).await?;

    guest.input("Hi! Is the hall").await?;
    guest.input("Hi! Is the hall free on Saturday evening?").await?;
    sleep(Duration::from_millis(50)).await;
    println!(
        "{} {:?}",
        "typing in host view:".dimmed(),
        host.view().typing
    );
    guest.send().await?;

    host.input("Yes, from 6pm. How many guests?").await?;
    host.send().await?;
    guest.input("About forty.").await?;
    guest.send().await?;
    sleep(Duration::from_millis(100)).await;

    let counterpart = guest.counterpart_profile(&conversation.id).await?;
    println!(
        "\n{} {}",
        "Conversation with".bold(),
        counterpart.display_name.cyan().bold()
    );
    for message in guest.view().messages {
        let who = if message.sender_id == config.participant_id {
            message.sender_id.green()
        } else {
            message.sender_id.cyan()
        };
        println!(
            "  {} {}: {}",
            message.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
            who,
            message.body
        );
    }

    if let Some(latest) = store.get_conversation(&conversation.id).await? {
        println!("\n{}", "Unread".bold());
        for participant in &latest.participants {
            println!("  {}: {}", participant, latest.unread_for(participant));
        }
    }

    guest.shutdown().await;
    host.shutdown().await;
    info!("Demo finished");
    Ok(())
}
