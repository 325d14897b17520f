/// Document store collaborator: live snapshot queries plus partial writes
pub mod memory;

use crate::error::{InboxError, Result};
use crate::model::{
    Conversation, ConversationPatch, Message, NewConversation, Profile, TypingEntry,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

pub use memory::{MemoryStore, StoreOp, StoreStats};

/// Receives the full current result set on every change.
/// After an `Err` the subscription delivers nothing more.
pub type Listener<T> = Box<dyn FnMut(Result<Vec<T>>) + Send + 'static>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Conversations containing `participant_id`, newest `last_message_at` first
    fn subscribe_conversations(
        &self,
        participant_id: &str,
        listener: Listener<Conversation>,
    ) -> Subscription;

    /// Messages of one conversation, ascending by server timestamp
    fn subscribe_messages(&self, conversation_id: &str, listener: Listener<Message>)
        -> Subscription;

    /// Every presence entry of one conversation, the caller's own included
    fn subscribe_typing(
        &self,
        conversation_id: &str,
        listener: Listener<TypingEntry>,
    ) -> Subscription;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Two-party conversations between `a` and `b`, oldest first
    async fn find_conversations_between(&self, a: &str, b: &str) -> Result<Vec<Conversation>>;

    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation>;

    async fn update_conversation(&self, conversation_id: &str, patch: ConversationPatch)
        -> Result<()>;

    /// Write a message; the store assigns id and timestamp
    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<Message>;

    async fn set_typing(
        &self,
        conversation_id: &str,
        participant_id: &str,
        is_typing: bool,
    ) -> Result<()>;

    async fn get_profile(&self, participant_id: &str) -> Result<Option<Profile>>;
}

/// Failure a backend can report, mapped onto the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailure {
    PermissionDenied,
    MissingIndex,
    Unavailable,
}

impl StoreFailure {
    pub fn into_error(self, what: &str) -> InboxError {
        match self {
            StoreFailure::PermissionDenied => {
                InboxError::PermissionDenied(format!("{} rejected by access rules", what))
            }
            StoreFailure::MissingIndex => {
                InboxError::MissingIndex(format!("{} requires an index that does not exist", what))
            }
            StoreFailure::Unavailable => {
                InboxError::Transport(format!("{} failed: store unavailable", what))
            }
        }
    }
}

/// Slot shared between a subscription task and its handle.
/// Emptying it under the lock guarantees no delivery after release.
pub(crate) struct ListenerSlot<T> {
    inner: Arc<Mutex<Option<Listener<T>>>>,
}

impl<T> Clone for ListenerSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> ListenerSlot<T> {
    pub(crate) fn new(listener: Listener<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(listener))),
        }
    }

    /// Returns false once the listener has been released
    pub(crate) fn deliver(&self, snapshot: Result<Vec<T>>) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(listener) => {
                listener(snapshot);
                true
            }
            None => false,
        }
    }

    pub(crate) fn release(&self) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.take().is_some()
    }

    pub(crate) fn is_held(&self) -> bool {
        self.inner.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Handle to one live query.
///
/// Cancelling is idempotent and also happens on drop. Must not be cancelled
/// from inside its own listener.
pub struct Subscription {
    label: String,
    task: Option<JoinHandle<()>>,
    release: Option<Box<dyn FnOnce() -> bool + Send + Sync>>,
    probe: Box<dyn Fn() -> bool + Send + Sync>,
}

impl Subscription {
    pub(crate) fn new<T: Send + 'static>(
        label: String,
        task: JoinHandle<()>,
        slot: ListenerSlot<T>,
    ) -> Self {
        let probe_slot = slot.clone();
        Self {
            label,
            task: Some(task),
            release: Some(Box::new(move || slot.release())),
            probe: Box::new(move || probe_slot.is_held()),
        }
    }

    /// True until cancelled or until the query failed
    pub fn is_active(&self) -> bool {
        self.release.is_some() && (self.probe)()
    }

    pub fn cancel(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            debug!("Subscription {} cancelled", self.label);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}
