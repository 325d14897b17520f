/// Write-side conversation operations: send, get-or-create
use crate::draft::validate_body;
use crate::error::{InboxError, Result};
use crate::model::{Conversation, ListingContext, Message, NewConversation, ParticipantRole};
use crate::read_state::ReadStateTracker;
use crate::store::DocumentStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A send that passed local validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub conversation_id: String,
    pub sender_id: String,
    /// Trimmed, never empty
    pub body: String,
}

impl SendRequest {
    /// Checks everything that can be checked without the store
    pub fn new(conversation_id: &str, sender_id: &str, body: &str) -> Result<Self> {
        if conversation_id.trim().is_empty() {
            return Err(InboxError::validation("no active conversation"));
        }
        if sender_id.trim().is_empty() {
            return Err(InboxError::validation("no signed-in participant"));
        }
        Ok(Self {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            body: validate_body(body)?,
        })
    }
}

/// Append the message, then update preview, timestamp and the other
/// participants' unread counters. The two writes are not atomic.
pub async fn send_message(store: &Arc<dyn DocumentStore>, request: SendRequest) -> Result<Message> {
    let conversation = store
        .get_conversation(&request.conversation_id)
        .await?
        .ok_or_else(|| {
            InboxError::NotFound(format!("conversation {}", request.conversation_id))
        })?;
    if !conversation.has_participant(&request.sender_id) {
        return Err(InboxError::validation(format!(
            "{} is not a participant of {}",
            request.sender_id, request.conversation_id
        )));
    }

    let message = store
        .append_message(&request.conversation_id, &request.sender_id, &request.body)
        .await?;
    ReadStateTracker::new(store.clone())
        .record_send(&conversation, &message)
        .await?;

    debug!(
        "{} sent {} to {}",
        message.sender_id, message.id, message.conversation_id
    );
    Ok(message)
}

/// Existing two-party conversation between `initiator` and `counterpart`
/// (for `listing` when given), or a new one.
///
/// Without a listing, a conversation that has none is preferred over one that
/// does; among equals the oldest wins. Two first contacts racing each other
/// may still both create.
pub async fn get_or_create_conversation(
    store: &dyn DocumentStore,
    initiator: &str,
    counterpart: &str,
    listing: Option<ListingContext>,
) -> Result<Conversation> {
    if initiator.trim().is_empty() || counterpart.trim().is_empty() {
        return Err(InboxError::validation("both participants are required"));
    }
    if initiator == counterpart {
        return Err(InboxError::validation(
            "a conversation needs two distinct participants",
        ));
    }

    let candidates = store
        .find_conversations_between(initiator, counterpart)
        .await?;
    let existing = match &listing {
        Some(wanted) => candidates
            .iter()
            .find(|c| c.listing_id() == Some(wanted.listing_id.as_str())),
        None => candidates
            .iter()
            .find(|c| c.listing.is_none())
            .or_else(|| candidates.first()),
    };
    if let Some(conversation) = existing {
        debug!("Reusing conversation {}", conversation.id);
        return Ok(conversation.clone());
    }

    let participants = vec![initiator.to_string(), counterpart.to_string()];
    let roles = roles_for(&participants, listing.as_ref());
    let conversation = store
        .create_conversation(NewConversation {
            participants,
            roles,
            listing,
        })
        .await?;
    info!(
        "Created conversation {} between {} and {}",
        conversation.id, initiator, counterpart
    );
    Ok(conversation)
}

fn roles_for(
    participants: &[String],
    listing: Option<&ListingContext>,
) -> HashMap<String, ParticipantRole> {
    let host = match listing.and_then(|l| l.host_id.as_deref()) {
        Some(host) if participants.iter().any(|p| p == host) => host,
        _ => return HashMap::new(),
    };
    participants
        .iter()
        .map(|p| {
            let role = if p == host {
                ParticipantRole::Host
            } else {
                ParticipantRole::Guest
            };
            (p.clone(), role)
        })
        .collect()
}
