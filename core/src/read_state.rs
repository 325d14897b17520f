/// Per-participant unread counters.
///
/// A counter only grows when someone else sends and only drops (to zero)
/// when its owner marks the conversation read. Each writer touches its own
/// map keys, so concurrent senders and readers never overwrite each other.
use crate::error::Result;
use crate::model::{Conversation, ConversationPatch, Message, UnreadOp};
use crate::store::DocumentStore;
use std::sync::Arc;
use tracing::{debug, warn};

const PREVIEW_CHARS: usize = 120;

#[derive(Clone)]
pub struct ReadStateTracker {
    store: Arc<dyn DocumentStore>,
}

impl ReadStateTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Reset `participant_id`'s counter for the conversation to zero
    pub async fn mark_read(&self, conversation_id: &str, participant_id: &str) -> Result<()> {
        let mut patch = ConversationPatch::default();
        patch.unread.insert(participant_id.to_string(), UnreadOp::Reset);
        self.store.update_conversation(conversation_id, patch).await?;
        debug!("{} read {}", participant_id, conversation_id);
        Ok(())
    }

    /// Fire-and-forget `mark_read`; failures are only logged
    pub fn mark_read_detached(&self, conversation_id: &str, participant_id: &str) {
        let tracker = self.clone();
        let cid = conversation_id.to_string();
        let pid = participant_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = tracker.mark_read(&cid, &pid).await {
                warn!("Could not mark {} read for {}: {}", cid, pid, e);
            }
        });
    }

    /// Preview, timestamp and +1 for everyone but the sender
    pub fn patch_for_send(conversation: &Conversation, message: &Message) -> ConversationPatch {
        let unread = conversation
            .participants
            .iter()
            .filter(|p| **p != message.sender_id)
            .map(|p| (p.clone(), UnreadOp::Increment(1)))
            .collect();
        ConversationPatch {
            last_message: Some(preview(&message.body)),
            last_message_at: Some(message.timestamp),
            unread,
        }
    }

    /// Apply the post-send patch. Errors belong to the send.
    pub async fn record_send(&self, conversation: &Conversation, message: &Message) -> Result<()> {
        let patch = Self::patch_for_send(conversation, message);
        self.store.update_conversation(&conversation.id, patch).await
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() <= PREVIEW_CHARS {
        return body.to_string();
    }
    let mut cut: String = body.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}
