/// Orchestrator scenarios: selection, scrolling, send failures, exit paths
extern crate inbox_core;

use inbox_core::events::{Feed, InboxEvent, ScrollReason};
use inbox_core::local_store::{LocalStore, ProfileCache};
use inbox_core::messaging::{get_or_create_conversation, send_message, SendRequest};
use inbox_core::model::{Identity, ListingContext, Profile};
use inbox_core::store::{DocumentStore, MemoryStore, StoreFailure, StoreOp};
use inbox_core::{Config, Inbox, SendErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

struct Fixture {
    memory: MemoryStore,
    store: Arc<dyn DocumentStore>,
}

impl Fixture {
    fn new() -> Self {
        let memory = MemoryStore::new();
        let store: Arc<dyn DocumentStore> = Arc::new(memory.clone());
        Self { memory, store }
    }

    fn inbox(&self, participant: &str) -> Inbox {
        Inbox::new(
            self.store.clone(),
            Identity::new(participant, participant.to_uppercase()),
            Config::for_participant(participant),
        )
        .unwrap()
    }

    async fn conversation(&self, a: &str, b: &str) -> String {
        get_or_create_conversation(&self.memory, a, b, None)
            .await
            .unwrap()
            .id
    }

    async fn send_as(&self, conversation_id: &str, sender: &str, body: &str) {
        send_message(
            &self.store,
            SendRequest::new(conversation_id, sender, body).unwrap(),
        )
        .await
        .unwrap();
    }
}

/// Let spawned tasks run until the runtime is idle
async fn settle() {
    sleep(Duration::from_millis(20)).await;
}

fn drain(rx: &mut broadcast::Receiver<InboxEvent>) -> Vec<InboxEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn scrolls(events: &[InboxEvent]) -> Vec<ScrollReason> {
    events
        .iter()
        .filter_map(|e| match e {
            InboxEvent::ScrollToBottom { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_initial_load_scrolls_once() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    for i in 0..5 {
        fx.send_as(&cid, "host", &format!("note {}", i)).await;
    }

    let guest = fx.inbox("guest");
    let mut events = guest.subscribe_events();
    guest.start().await.unwrap();
    guest.select(&cid).await.unwrap();
    settle().await;

    let seen = drain(&mut events);
    assert_eq!(scrolls(&seen), vec![ScrollReason::InitialLoad]);
    assert_eq!(guest.view().messages.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_new_message_scrolls_and_republish_does_not() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    for i in 0..5 {
        fx.send_as(&cid, "host", &format!("note {}", i)).await;
    }

    let guest = fx.inbox("guest");
    let mut events = guest.subscribe_events();
    guest.select(&cid).await.unwrap();
    settle().await;
    drain(&mut events);

    fx.memory.republish_messages(&cid);
    settle().await;
    assert!(scrolls(&drain(&mut events)).is_empty());

    fx.send_as(&cid, "host", "sixth").await;
    settle().await;
    let seen = drain(&mut events);
    assert_eq!(scrolls(&seen), vec![ScrollReason::NewMessage]);
    assert_eq!(guest.view().messages.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_sent_message_arrives_through_stream() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    let guest = fx.inbox("guest");
    guest.select(&cid).await.unwrap();
    settle().await;

    guest.input("  Is parking included?  ").await.unwrap();
    let sent = guest.send().await.unwrap();
    assert_eq!(sent.body, "Is parking included?");
    assert_eq!(guest.draft_text(), "");

    settle().await;
    let view = guest.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].id, sent.id);
    assert!(view.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_blank_send_is_rejected_locally() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    let guest = fx.inbox("guest");

    // Nothing selected yet
    assert!(guest.send().await.unwrap_err().is_validation());
    assert!(guest.input("hi").await.unwrap_err().is_validation());

    guest.select(&cid).await.unwrap();
    guest.input("   ").await.unwrap();
    let err = guest.send().await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(guest.draft_text(), "   ");
    assert_eq!(fx.memory.stats().messages_written, 0);
    assert_eq!(fx.memory.stats().conversation_updates, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_restores_draft_and_reports_kind() {
    let cases = [
        (StoreFailure::PermissionDenied, SendErrorKind::PermissionDenied),
        (StoreFailure::MissingIndex, SendErrorKind::MissingIndex),
        (StoreFailure::Unavailable, SendErrorKind::Other),
    ];

    for (failure, expected) in cases {
        let fx = Fixture::new();
        let cid = fx.conversation("guest", "host").await;
        let guest = fx.inbox("guest");
        let mut events = guest.subscribe_events();
        guest.select(&cid).await.unwrap();

        fx.memory.inject_failure(StoreOp::AppendMessage, failure);
        guest.input(" Can I book for 80 people? ").await.unwrap();
        let err = guest.send().await.unwrap_err();

        assert_eq!(err.send_error_kind(), expected);
        assert_eq!(guest.draft_text(), " Can I book for 80 people? ");
        assert_eq!(
            guest.view().last_error.as_deref(),
            Some(expected.user_message())
        );
        let failed: Vec<SendErrorKind> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                InboxEvent::SendFailed { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec![expected]);

        // The typing flag went down before the write was attempted
        assert!(!fx.memory.is_typing(&cid, "guest").await);

        fx.memory.clear_failure(StoreOp::AppendMessage);
        guest.send().await.unwrap();
        assert_eq!(guest.draft_text(), "");
        assert!(guest.view().last_error.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_typing_cleared_on_send() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    let guest = fx.inbox("guest");
    guest.select(&cid).await.unwrap();

    guest.input("See you").await.unwrap();
    settle().await;
    assert!(fx.memory.is_typing(&cid, "guest").await);

    guest.send().await.unwrap();
    assert!(!guest.is_typing());
    assert!(!fx.memory.is_typing(&cid, "guest").await);
}

#[tokio::test(start_paused = true)]
async fn test_typing_cleared_on_switch() {
    let fx = Fixture::new();
    let first = fx.conversation("guest", "host").await;
    let second = fx.conversation("guest", "cohost").await;
    let guest = fx.inbox("guest");
    guest.select(&first).await.unwrap();

    guest.input("half a thought").await.unwrap();
    settle().await;
    assert!(fx.memory.is_typing(&first, "guest").await);

    guest.select(&second).await.unwrap();
    assert!(!fx.memory.is_typing(&first, "guest").await);
    assert_eq!(guest.draft_text(), "");
    assert_eq!(guest.selected().as_deref(), Some(second.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_typing_cleared_on_blur_and_shutdown() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    let guest = fx.inbox("guest");
    guest.start().await.unwrap();
    guest.select(&cid).await.unwrap();

    guest.input("typing").await.unwrap();
    settle().await;
    guest.blur().await;
    assert!(!fx.memory.is_typing(&cid, "guest").await);

    guest.input("typing again").await.unwrap();
    settle().await;
    assert!(fx.memory.is_typing(&cid, "guest").await);
    guest.shutdown().await;
    assert!(!fx.memory.is_typing(&cid, "guest").await);
    assert!(guest.selected().is_none());

    guest.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_typing_goes_idle_after_timeout() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    let guest = fx.inbox("guest");
    let host = fx.inbox("host");
    guest.select(&cid).await.unwrap();
    host.select(&cid).await.unwrap();

    guest.input("h").await.unwrap();
    guest.input("he").await.unwrap();
    guest.input("hey").await.unwrap();
    settle().await;
    assert_eq!(host.view().typing, vec!["guest".to_string()]);
    assert!(guest.view().typing.is_empty());

    sleep(Duration::from_millis(3100)).await;
    assert!(host.view().typing.is_empty());
    assert_eq!(
        fx.memory.typing_log(&cid),
        vec![("guest".to_string(), true), ("guest".to_string(), false)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_switch_stops_old_stream() {
    let fx = Fixture::new();
    let first = fx.conversation("guest", "host").await;
    let second = fx.conversation("guest", "cohost").await;
    fx.send_as(&first, "host", "in first").await;

    let guest = fx.inbox("guest");
    guest.select(&first).await.unwrap();
    settle().await;
    assert_eq!(guest.view().messages.len(), 1);

    guest.select(&second).await.unwrap();
    settle().await;
    assert!(guest.view().messages.is_empty());

    fx.send_as(&first, "host", "late reply").await;
    settle().await;
    assert!(guest.view().messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_directory_orders_by_latest_activity() {
    let fx = Fixture::new();
    let older = fx.conversation("guest", "host").await;
    let newer = fx.conversation("guest", "cohost").await;
    let _unrelated = fx.conversation("host", "cohost").await;

    let guest = fx.inbox("guest");
    guest.start().await.unwrap();
    settle().await;
    let ids: Vec<String> = guest.view().conversations.into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![newer.clone(), older.clone()]);

    fx.send_as(&older, "host", "bump").await;
    settle().await;
    let view = guest.view();
    let ids: Vec<String> = view.conversations.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec![older.clone(), newer]);
    assert_eq!(view.conversations[0].last_message, "bump");
    assert_eq!(view.conversations[0].unread_for("guest"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_viewing_marks_read() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    fx.send_as(&cid, "guest", "one").await;
    fx.send_as(&cid, "guest", "two").await;

    let host = fx.inbox("host");
    host.start().await.unwrap();
    settle().await;
    assert_eq!(host.view().conversations[0].unread_for("host"), 2);

    host.select(&cid).await.unwrap();
    settle().await;
    let conv = fx.store.get_conversation(&cid).await.unwrap().unwrap();
    assert_eq!(conv.unread_for("host"), 0);

    // Arrivals while the conversation is open are read right away
    fx.send_as(&cid, "guest", "three").await;
    settle().await;
    let conv = fx.store.get_conversation(&cid).await.unwrap().unwrap();
    assert_eq!(conv.unread_for("host"), 0);
    assert_eq!(conv.unread_for("guest"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mark_read_failure_does_not_block_display() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    fx.send_as(&cid, "guest", "hello").await;

    fx.memory
        .inject_failure(StoreOp::UpdateConversation, StoreFailure::PermissionDenied);
    let host = fx.inbox("host");
    host.select(&cid).await.unwrap();
    settle().await;

    assert_eq!(host.view().messages.len(), 1);
    host.input("still typing fine").await.unwrap();
    assert_eq!(host.draft_text(), "still typing fine");
}

#[tokio::test(start_paused = true)]
async fn test_directory_failure_marks_stale() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    let guest = fx.inbox("guest");
    let mut events = guest.subscribe_events();
    guest.start().await.unwrap();
    guest.select(&cid).await.unwrap();
    settle().await;
    drain(&mut events);

    fx.memory.interrupt_subscriptions(StoreFailure::Unavailable);
    settle().await;

    let view = guest.view();
    assert!(view.directory_stale);
    assert!(view.messages_stale);
    assert_eq!(view.conversations.len(), 1);
    let stale: Vec<Feed> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            InboxEvent::Stale { feed } => Some(feed),
            _ => None,
        })
        .collect();
    assert!(stale.contains(&Feed::Conversations));
    assert!(stale.contains(&Feed::Messages));

    // Restarting after a failure reopens the directory
    guest.start().await.unwrap();
    settle().await;
    assert!(!guest.view().directory_stale);
}

#[tokio::test(start_paused = true)]
async fn test_directory_needs_index() {
    let fx = Fixture::new();
    fx.memory
        .inject_failure(StoreOp::Subscribe, StoreFailure::MissingIndex);
    let guest = fx.inbox("guest");
    guest.start().await.unwrap();
    settle().await;
    assert!(guest.view().directory_stale);
}

#[tokio::test(start_paused = true)]
async fn test_open_conversation_with_reuses_existing() {
    let fx = Fixture::new();
    let guest = fx.inbox("guest");
    let listing = ListingContext::new("loft-7", "Sunny Loft").with_host("host");

    let first = guest
        .open_conversation_with("host", Some(listing.clone()))
        .await
        .unwrap();
    let second = guest
        .open_conversation_with("host", Some(listing))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(fx.memory.stats().conversations_created, 1);
    assert_eq!(guest.selected().as_deref(), Some(first.id.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_counterpart_profile_falls_back_to_cache() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    fx.memory
        .put_profile(Profile {
            participant_id: "host".to_string(),
            display_name: "Hannah".to_string(),
            photo_url: None,
        })
        .await;

    let cache = ProfileCache::new(LocalStore::temporary().unwrap());
    let guest = fx.inbox("guest").with_profile_cache(cache.clone());

    let live = guest.counterpart_profile(&cid).await.unwrap();
    assert_eq!(live.display_name, "Hannah");
    assert_eq!(cache.get("host").unwrap().unwrap().display_name, "Hannah");

    fx.memory
        .inject_failure(StoreOp::GetProfile, StoreFailure::Unavailable);
    let cached = guest.counterpart_profile(&cid).await.unwrap();
    assert_eq!(cached.display_name, "Hannah");

    let unknown = fx.conversation("guest", "stranger").await;
    let placeholder = guest.counterpart_profile(&unknown).await.unwrap();
    assert_eq!(placeholder.display_name, "stranger");
}

#[tokio::test]
async fn test_inbox_requires_signed_in_user() {
    let fx = Fixture::new();
    let result = Inbox::new(
        fx.store.clone(),
        Identity::new("", ""),
        Config::default(),
    );
    assert!(result.err().map(|e| e.is_validation()).unwrap_or(false));
}

#[tokio::test(start_paused = true)]
async fn test_stale_stream_leaves_arrivals_unread() {
    let fx = Fixture::new();
    let cid = fx.conversation("guest", "host").await;
    let host = fx.inbox("host");
    host.start().await.unwrap();
    settle().await;

    fx.memory
        .inject_failure(StoreOp::Subscribe, StoreFailure::MissingIndex);
    host.select(&cid).await.unwrap();
    settle().await;
    assert!(host.view().messages_stale);

    fx.send_as(&cid, "guest", "unseen").await;
    settle().await;

    let view = host.view();
    assert!(view.messages.is_empty());
    assert_eq!(view.conversations[0].unread_for("host"), 1);
    let conv = fx.store.get_conversation(&cid).await.unwrap().unwrap();
    assert_eq!(conv.unread_for("host"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_viewer_stays_caught_up_without_start() {
    for round in 0..50 {
        let fx = Fixture::new();
        let cid = fx.conversation("guest", "host").await;
        let host = fx.inbox("host");
        host.select(&cid).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        fx.send_as(&cid, "guest", &format!("round {}", round)).await;

        let mut caught_up = false;
        for _ in 0..200 {
            sleep(Duration::from_millis(5)).await;
            let conv = fx.store.get_conversation(&cid).await.unwrap().unwrap();
            if host.view().messages.len() == 1 && conv.unread_for("host") == 0 {
                caught_up = true;
                break;
            }
        }
        assert!(caught_up, "round {} left the open conversation unread", round);
        host.shutdown().await;
    }
}
