/// Live list of the conversations one participant belongs to
use crate::error::{InboxError, Result};
use crate::model::{Conversation, ListingContext};
use crate::store::{DocumentStore, Subscription};
use tracing::{debug, warn};

/// Latest state delivered by the directory subscription
#[derive(Debug, Clone, Default)]
pub struct DirectoryState {
    /// Newest activity first
    pub conversations: Vec<Conversation>,
    /// The subscription failed; `conversations` will not change again
    pub stale: bool,
}

impl DirectoryState {
    pub fn find(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    pub fn unread_total(&self, participant_id: &str) -> u32 {
        self.conversations
            .iter()
            .map(|c| c.unread_for(participant_id))
            .sum()
    }

    /// Conversations grouped by listing, groups in order of first appearance
    pub fn by_listing(&self) -> Vec<(Option<ListingContext>, Vec<Conversation>)> {
        let mut groups: Vec<(Option<ListingContext>, Vec<Conversation>)> = Vec::new();
        for conversation in &self.conversations {
            let key = conversation.listing_id();
            match groups
                .iter_mut()
                .find(|(l, _)| l.as_ref().map(|l| l.listing_id.as_str()) == key)
            {
                Some((_, members)) => members.push(conversation.clone()),
                None => groups.push((conversation.listing.clone(), vec![conversation.clone()])),
            }
        }
        groups
    }
}

/// Live directory for one participant. Dropping it releases the subscription.
pub struct ConversationDirectory {
    subscription: Subscription,
}

impl ConversationDirectory {
    /// Start following `participant_id`'s conversations. `on_update` sees the
    /// full state after every snapshot and once more if the feed goes stale.
    pub fn open<F>(
        store: &dyn DocumentStore,
        participant_id: &str,
        mut on_update: F,
    ) -> Result<Self>
    where
        F: FnMut(&DirectoryState) + Send + 'static,
    {
        if participant_id.trim().is_empty() {
            return Err(InboxError::validation(
                "conversation directory needs a signed-in participant",
            ));
        }

        let mut state = DirectoryState::default();
        let pid = participant_id.to_string();

        let subscription = store.subscribe_conversations(
            participant_id,
            Box::new(move |snapshot| {
                match snapshot {
                    Ok(conversations) => {
                        debug!("Directory for {}: {} conversations", pid, conversations.len());
                        state.conversations = conversations;
                    }
                    Err(e) => {
                        warn!("Directory for {} went stale: {}", pid, e);
                        state.stale = true;
                    }
                }
                on_update(&state);
            }),
        );

        Ok(Self { subscription })
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_active()
    }

    /// Release the subscription. Safe to call more than once.
    pub fn close(&mut self) {
        self.subscription.cancel();
    }
}
