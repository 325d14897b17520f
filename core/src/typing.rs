/// Typing presence: per-participant flags and the keystroke debounce policy
use crate::error::Result;
use crate::store::{DocumentStore, Subscription};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Quiet period after the last keystroke before the flag drops
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_millis(3000);

/// Reads and writes presence entries for one participant
#[derive(Clone)]
pub struct TypingChannel {
    store: Arc<dyn DocumentStore>,
    participant_id: String,
}

impl TypingChannel {
    pub fn new(store: Arc<dyn DocumentStore>, participant_id: impl Into<String>) -> Self {
        Self {
            store,
            participant_id: participant_id.into(),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub async fn set_flag(&self, conversation_id: &str, is_typing: bool) -> Result<()> {
        self.store
            .set_typing(conversation_id, &self.participant_id, is_typing)
            .await
    }

    /// Follow who else is typing. `on_change` gets the sorted ids of every
    /// other participant whose flag is set, whenever that set changes.
    /// A failed feed reports an empty set and stops.
    pub fn subscribe<F>(&self, conversation_id: &str, mut on_change: F) -> Subscription
    where
        F: FnMut(Vec<String>) + Send + 'static,
    {
        let viewer = self.participant_id.clone();
        let cid = conversation_id.to_string();
        let mut last: Option<BTreeSet<String>> = None;

        self.store.subscribe_typing(
            conversation_id,
            Box::new(move |snapshot| {
                let current: BTreeSet<String> = match snapshot {
                    Ok(entries) => entries
                        .into_iter()
                        .filter(|e| e.is_typing && e.participant_id != viewer)
                        .map(|e| e.participant_id)
                        .collect(),
                    Err(e) => {
                        warn!("Typing feed for {} failed, showing nobody: {}", cid, e);
                        BTreeSet::new()
                    }
                };
                if last.as_ref() != Some(&current) {
                    on_change(current.iter().cloned().collect());
                    last = Some(current);
                }
            }),
        )
    }
}

struct WriteRequest {
    /// None only waits for earlier writes
    value: Option<bool>,
    done: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct DebounceState {
    typing: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Turns keystrokes in one conversation into at most one `true` write per
/// burst and exactly one `false` write when the burst ends. Writes go out
/// in order through a single writer task; failures are logged and dropped.
pub struct TypingDebouncer {
    conversation_id: String,
    idle_timeout: Duration,
    state: Arc<Mutex<DebounceState>>,
    writes: mpsc::UnboundedSender<WriteRequest>,
}

impl TypingDebouncer {
    pub fn new(channel: TypingChannel, conversation_id: &str, idle_timeout: Duration) -> Self {
        let (writes, mut rx) = mpsc::unbounded_channel::<WriteRequest>();
        let cid = conversation_id.to_string();

        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                if let Some(value) = req.value {
                    if let Err(e) = channel.set_flag(&cid, value).await {
                        warn!(
                            "Typing flag {} for {} in {} not written: {}",
                            value,
                            channel.participant_id(),
                            cid,
                            e
                        );
                    }
                }
                if let Some(done) = req.done {
                    let _ = done.send(());
                }
            }
        });

        Self {
            conversation_id: conversation_id.to_string(),
            idle_timeout,
            state: Arc::new(Mutex::new(DebounceState::default())),
            writes,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.lock().typing
    }

    /// Register a keystroke and restart the idle countdown
    pub fn keystroke(&self) {
        let mut state = self.lock();
        state.generation += 1;
        let generation = state.generation;

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if !state.typing {
            state.typing = true;
            debug!("Typing started in {}", self.conversation_id);
            self.enqueue(Some(true), None);
        }

        let shared = self.state.clone();
        let writes = self.writes.clone();
        let idle = self.idle_timeout;
        let cid = self.conversation_id.clone();
        state.timer = Some(tokio::spawn(async move {
            sleep(idle).await;
            let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
            if state.generation == generation && state.typing {
                state.typing = false;
                state.timer = None;
                debug!("Typing idle in {}", cid);
                let _ = writes.send(WriteRequest {
                    value: Some(false),
                    done: None,
                });
            }
        }));
    }

    /// Drop the flag now (blur, send, switch, teardown) and wait until the
    /// store has seen every queued write.
    pub async fn clear(&self) {
        let value = {
            let mut state = self.lock();
            state.generation += 1;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            if state.typing {
                state.typing = false;
                Some(false)
            } else {
                None
            }
        };
        self.wait_for(value).await;
    }

    /// Wait until queued writes have been attempted
    pub async fn flush(&self) {
        self.wait_for(None).await;
    }

    async fn wait_for(&self, value: Option<bool>) {
        let (tx, rx) = oneshot::channel();
        self.enqueue(value, Some(tx));
        let _ = rx.await;
    }

    fn enqueue(&self, value: Option<bool>, done: Option<oneshot::Sender<()>>) {
        if self.writes.send(WriteRequest { value, done }).is_err() {
            warn!("Typing writer for {} is gone", self.conversation_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        let mut state = self.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.typing {
            state.typing = false;
            drop(state);
            self.enqueue(Some(false), None);
        }
    }
}
