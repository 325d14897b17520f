/// Live message list for one conversation
use crate::error::{InboxError, Result};
use crate::events::ScrollReason;
use crate::model::Message;
use crate::store::{DocumentStore, Subscription};
use tracing::{debug, warn};

/// Decides scrolling from successive snapshot lengths.
/// Each stream owns one, so a newly selected conversation starts fresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollTracker {
    loaded: bool,
    last_len: usize,
}

impl ScrollTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, len: usize) -> Option<ScrollReason> {
        let reason = if !self.loaded {
            if len > 0 {
                self.loaded = true;
                Some(ScrollReason::InitialLoad)
            } else {
                None
            }
        } else if len > self.last_len {
            Some(ScrollReason::NewMessage)
        } else {
            None
        };
        self.last_len = len;
        reason
    }
}

/// What the stream hands its consumer
#[derive(Debug)]
pub enum StreamUpdate<'a> {
    Snapshot {
        messages: &'a [Message],
        scroll: Option<ScrollReason>,
    },
    Stale(&'a InboxError),
}

/// Live stream for one conversation. Dropping it releases the subscription.
pub struct MessageStream {
    subscription: Subscription,
}

impl MessageStream {
    pub fn open<F>(
        store: &dyn DocumentStore,
        conversation_id: &str,
        mut on_update: F,
    ) -> Result<Self>
    where
        F: FnMut(StreamUpdate<'_>) + Send + 'static,
    {
        if conversation_id.trim().is_empty() {
            return Err(InboxError::validation("message stream needs a conversation"));
        }

        let mut tracker = ScrollTracker::new();
        let cid = conversation_id.to_string();

        let subscription = store.subscribe_messages(
            conversation_id,
            Box::new(move |snapshot| match snapshot {
                Ok(messages) => {
                    let scroll = tracker.observe(messages.len());
                    debug!("Stream {}: {} messages, scroll {:?}", cid, messages.len(), scroll);
                    on_update(StreamUpdate::Snapshot {
                        messages: &messages,
                        scroll,
                    });
                }
                Err(e) => {
                    warn!("Stream {} went stale: {}", cid, e);
                    on_update(StreamUpdate::Stale(&e));
                }
            }),
        );

        Ok(Self { subscription })
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn close(&mut self) {
        self.subscription.cancel();
    }
}
