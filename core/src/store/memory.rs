/// In-process document store with live snapshot subscriptions.
/// Stands in for the remote store: server-side timestamps, per-key merges,
/// and injectable failures.
use super::{DocumentStore, Listener, ListenerSlot, StoreFailure, Subscription};
use crate::error::{InboxError, Result};
use crate::model::{
    Conversation, ConversationPatch, Message, NewConversation, Profile, TypingEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

const CHANGE_FEED_CAPACITY: usize = 1024;

/// Operations a failure can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Subscribe,
    CreateConversation,
    UpdateConversation,
    AppendMessage,
    SetTyping,
    GetProfile,
}

/// Write counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub conversations_created: u64,
    pub conversation_updates: u64,
    pub messages_written: u64,
    pub typing_writes: u64,
}

#[derive(Debug, Clone)]
enum Change {
    Conversation { participants: Vec<String> },
    Messages { conversation_id: String },
    Typing { conversation_id: String },
    Interrupted(StoreFailure),
}

#[derive(Default)]
struct State {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
    typing: HashMap<String, HashMap<String, TypingEntry>>,
    profiles: HashMap<String, Profile>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl State {
    /// Strictly increasing server clock
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn conversations_for(&self, participant_id: &str) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self
            .conversations
            .values()
            .filter(|c| c.has_participant(participant_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    fn messages_for(&self, conversation_id: &str) -> Vec<Message> {
        self.messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    fn typing_for(&self, conversation_id: &str) -> Vec<TypingEntry> {
        let mut entries: Vec<TypingEntry> = self
            .typing
            .get(conversation_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        entries
    }
}

struct Inner {
    state: RwLock<State>,
    changes: broadcast::Sender<Change>,
    failures: Mutex<HashMap<StoreOp, StoreFailure>>,
    stats: Mutex<StoreStats>,
    typing_log: Mutex<Vec<(String, String, bool)>>,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                changes,
                failures: Mutex::new(HashMap::new()),
                stats: Mutex::new(StoreStats::default()),
                typing_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make every call of `op` fail until cleared
    pub fn inject_failure(&self, op: StoreOp, failure: StoreFailure) {
        self.lock_failures().insert(op, failure);
    }

    pub fn clear_failure(&self, op: StoreOp) {
        self.lock_failures().remove(&op);
    }

    /// Break every live subscription, as a dropped connection would
    pub fn interrupt_subscriptions(&self, failure: StoreFailure) {
        let _ = self.inner.changes.send(Change::Interrupted(failure));
    }

    pub fn stats(&self) -> StoreStats {
        *self.inner.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Typing writes `(participant, is_typing)` for one conversation, in order
    pub fn typing_log(&self, conversation_id: &str) -> Vec<(String, bool)> {
        self.inner
            .typing_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(c, _, _)| c == conversation_id)
            .map(|(_, p, v)| (p.clone(), *v))
            .collect()
    }

    /// Current flag, false when no entry exists
    pub async fn is_typing(&self, conversation_id: &str, participant_id: &str) -> bool {
        let state = self.inner.state.read().await;
        state
            .typing
            .get(conversation_id)
            .and_then(|m| m.get(participant_id))
            .map(|e| e.is_typing)
            .unwrap_or(false)
    }

    pub async fn put_profile(&self, profile: Profile) {
        let mut state = self.inner.state.write().await;
        state.profiles.insert(profile.participant_id.clone(), profile);
    }

    /// Re-deliver the current message snapshot unchanged, as a
    /// metadata-only update would
    pub fn republish_messages(&self, conversation_id: &str) {
        self.publish(Change::Messages {
            conversation_id: conversation_id.to_string(),
        });
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<StoreOp, StoreFailure>> {
        self.inner.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, op: StoreOp, what: &str) -> Result<()> {
        match self.lock_failures().get(&op) {
            Some(failure) => Err(failure.into_error(what)),
            None => Ok(()),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut StoreStats)) {
        f(&mut self.inner.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }

    fn publish(&self, change: Change) {
        // No receivers just means nobody is subscribed
        let _ = self.inner.changes.send(change);
    }

    fn spawn_query<T, R, Q>(
        &self,
        label: String,
        listener: Listener<T>,
        relevant: R,
        query: Q,
    ) -> Subscription
    where
        T: Send + 'static,
        R: Fn(&Change) -> bool + Send + 'static,
        Q: Fn(&State) -> Vec<T> + Send + 'static,
    {
        let slot = ListenerSlot::new(listener);
        let task_slot = slot.clone();
        let inner = self.inner.clone();
        let refused = self.check(StoreOp::Subscribe, &label).err();
        // Subscribe before the first read so no change slips between them
        let mut rx = inner.changes.subscribe();
        let task_label = label.clone();

        let task = tokio::spawn(async move {
            if let Some(err) = refused {
                warn!("Subscription {} refused: {}", task_label, err);
                task_slot.deliver(Err(err));
                task_slot.release();
                return;
            }

            let initial = {
                let state = inner.state.read().await;
                query(&*state)
            };
            if !task_slot.deliver(Ok(initial)) {
                return;
            }

            loop {
                match rx.recv().await {
                    Ok(Change::Interrupted(failure)) => {
                        let err = failure.into_error(&task_label);
                        warn!("Subscription {} interrupted: {}", task_label, err);
                        task_slot.deliver(Err(err));
                        task_slot.release();
                        return;
                    }
                    Ok(change) if !relevant(&change) => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        debug!("Subscription {} lagged {} changes, resyncing", task_label, n);
                    }
                    Err(RecvError::Closed) => return,
                }

                let snapshot = {
                    let state = inner.state.read().await;
                    query(&*state)
                };
                if !task_slot.deliver(Ok(snapshot)) {
                    return;
                }
            }
        });

        debug!("Subscription {} opened", label);
        Subscription::new(label, task, slot)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn subscribe_conversations(
        &self,
        participant_id: &str,
        listener: Listener<Conversation>,
    ) -> Subscription {
        let pid = participant_id.to_string();
        let query_pid = pid.clone();
        self.spawn_query(
            format!("conversations:{}", participant_id),
            listener,
            move |change| match change {
                Change::Conversation { participants } => participants.contains(&pid),
                _ => false,
            },
            move |state| state.conversations_for(&query_pid),
        )
    }

    fn subscribe_messages(
        &self,
        conversation_id: &str,
        listener: Listener<Message>,
    ) -> Subscription {
        let cid = conversation_id.to_string();
        let query_cid = cid.clone();
        self.spawn_query(
            format!("messages:{}", conversation_id),
            listener,
            move |change| {
                matches!(change, Change::Messages { conversation_id } if *conversation_id == cid)
            },
            move |state| state.messages_for(&query_cid),
        )
    }

    fn subscribe_typing(
        &self,
        conversation_id: &str,
        listener: Listener<TypingEntry>,
    ) -> Subscription {
        let cid = conversation_id.to_string();
        let query_cid = cid.clone();
        self.spawn_query(
            format!("typing:{}", conversation_id),
            listener,
            move |change| {
                matches!(change, Change::Typing { conversation_id } if *conversation_id == cid)
            },
            move |state| state.typing_for(&query_cid),
        )
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let state = self.inner.state.read().await;
        Ok(state.conversations.get(conversation_id).cloned())
    }

    async fn find_conversations_between(&self, a: &str, b: &str) -> Result<Vec<Conversation>> {
        let state = self.inner.state.read().await;
        let mut found: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.is_between(a, b))
            .cloned()
            .collect();
        found.sort_by(|x, y| x.created_at.cmp(&y.created_at).then_with(|| x.id.cmp(&y.id)));
        Ok(found)
    }

    async fn create_conversation(&self, new: NewConversation) -> Result<Conversation> {
        self.check(StoreOp::CreateConversation, "create conversation")?;

        let mut state = self.inner.state.write().await;
        let now = state.next_timestamp();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            unread: new.participants.iter().map(|p| (p.clone(), 0)).collect(),
            participants: new.participants,
            roles: new.roles,
            listing: new.listing,
            last_message: String::new(),
            last_message_at: now,
            created_at: now,
        };
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        drop(state);

        self.bump(|s| s.conversations_created += 1);
        self.publish(Change::Conversation {
            participants: conversation.participants.clone(),
        });
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        conversation_id: &str,
        patch: ConversationPatch,
    ) -> Result<()> {
        self.check(StoreOp::UpdateConversation, "update conversation")?;

        let mut state = self.inner.state.write().await;
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| InboxError::NotFound(format!("conversation {}", conversation_id)))?;

        if let Some(preview) = patch.last_message {
            conversation.last_message = preview;
        }
        if let Some(at) = patch.last_message_at {
            conversation.last_message_at = at;
        }
        for (participant, op) in patch.unread {
            let entry = conversation.unread.entry(participant).or_insert(0);
            *entry = op.apply(*entry);
        }
        let participants = conversation.participants.clone();
        drop(state);

        self.bump(|s| s.conversation_updates += 1);
        self.publish(Change::Conversation { participants });
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<Message> {
        self.check(StoreOp::AppendMessage, "write message")?;

        let mut state = self.inner.state.write().await;
        if !state.conversations.contains_key(conversation_id) {
            return Err(InboxError::NotFound(format!("conversation {}", conversation_id)));
        }
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            timestamp: state.next_timestamp(),
        };
        state
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        drop(state);

        self.bump(|s| s.messages_written += 1);
        self.publish(Change::Messages {
            conversation_id: conversation_id.to_string(),
        });
        Ok(message)
    }

    async fn set_typing(
        &self,
        conversation_id: &str,
        participant_id: &str,
        is_typing: bool,
    ) -> Result<()> {
        self.check(StoreOp::SetTyping, "set typing")?;

        let mut state = self.inner.state.write().await;
        let updated_at = Utc::now();
        state
            .typing
            .entry(conversation_id.to_string())
            .or_default()
            .insert(
                participant_id.to_string(),
                TypingEntry {
                    conversation_id: conversation_id.to_string(),
                    participant_id: participant_id.to_string(),
                    is_typing,
                    updated_at,
                },
            );
        drop(state);

        self.bump(|s| s.typing_writes += 1);
        self.inner
            .typing_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((conversation_id.to_string(), participant_id.to_string(), is_typing));
        self.publish(Change::Typing {
            conversation_id: conversation_id.to_string(),
        });
        Ok(())
    }

    async fn get_profile(&self, participant_id: &str) -> Result<Option<Profile>> {
        self.check(StoreOp::GetProfile, "profile lookup")?;
        let state = self.inner.state.read().await;
        Ok(state.profiles.get(participant_id).cloned())
    }
}
