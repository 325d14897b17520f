/// Screen-level messaging controller.
///
/// Owns the directory subscription for the signed-in session and, for the
/// selected conversation, the message stream, the typing feed and the typing
/// debouncer. Subscription listeners only touch the shared view; they never
/// take the session lock, so cancelling under that lock cannot deadlock.
use crate::config::Config;
use crate::directory::{ConversationDirectory, DirectoryState};
use crate::draft::{Draft, Outgoing};
use crate::error::{InboxError, Result};
use crate::events::{Feed, InboxEvent};
use crate::local_store::ProfileCache;
use crate::messaging::{get_or_create_conversation, send_message, SendRequest};
use crate::model::{Conversation, Identity, ListingContext, Message, Profile};
use crate::profile::ProfileResolver;
use crate::read_state::ReadStateTracker;
use crate::store::{DocumentStore, Subscription};
use crate::stream::{MessageStream, StreamUpdate};
use crate::typing::{TypingChannel, TypingDebouncer};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// What a renderer needs, refreshed by the live subscriptions
#[derive(Debug, Clone, Default, Serialize)]
pub struct InboxView {
    pub conversations: Vec<Conversation>,
    pub directory_stale: bool,
    pub selected: Option<String>,
    pub messages: Vec<Message>,
    pub messages_stale: bool,
    /// Others typing in the selected conversation
    pub typing: Vec<String>,
    /// User-facing text of the last failed send
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Composer {
    conversation_id: Option<String>,
    draft: Draft,
    debouncer: Option<Arc<TypingDebouncer>>,
}

struct ActiveConversation {
    conversation_id: String,
    stream: MessageStream,
    typing_feed: Subscription,
    debouncer: Arc<TypingDebouncer>,
}

#[derive(Default)]
struct Session {
    directory: Option<ConversationDirectory>,
    active: Option<ActiveConversation>,
}

pub struct Inbox {
    store: Arc<dyn DocumentStore>,
    identity: Identity,
    config: Config,
    events: broadcast::Sender<InboxEvent>,
    view: Arc<Mutex<InboxView>>,
    composer: Mutex<Composer>,
    session: tokio::sync::Mutex<Session>,
    read_state: ReadStateTracker,
    typing: TypingChannel,
    profiles: Option<ProfileResolver>,
}

impl Inbox {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Identity, config: Config) -> Result<Self> {
        if identity.participant_id.trim().is_empty() {
            return Err(InboxError::validation("no signed-in participant"));
        }
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let typing = TypingChannel::new(store.clone(), identity.participant_id.clone());

        Ok(Self {
            read_state: ReadStateTracker::new(store.clone()),
            typing,
            store,
            identity,
            config,
            events,
            view: Arc::new(Mutex::new(InboxView::default())),
            composer: Mutex::new(Composer::default()),
            session: tokio::sync::Mutex::new(Session::default()),
            profiles: None,
        })
    }

    /// Resolve counterpart profiles through the store with a local cache fallback
    pub fn with_profile_cache(mut self, cache: ProfileCache) -> Self {
        self.profiles = Some(ProfileResolver::new(
            self.store.clone(),
            cache,
            self.identity.clone(),
        ));
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<InboxEvent> {
        self.events.subscribe()
    }

    pub fn view(&self) -> InboxView {
        lock(&self.view).clone()
    }

    pub fn selected(&self) -> Option<String> {
        lock(&self.view).selected.clone()
    }

    pub fn draft_text(&self) -> String {
        lock(&self.composer).draft.text().to_string()
    }

    /// Whether the local debouncer currently holds a `true` flag
    pub fn is_typing(&self) -> bool {
        lock(&self.composer)
            .debouncer
            .as_ref()
            .map(|d| d.is_typing())
            .unwrap_or(false)
    }

    /// Open the conversation directory. Calling it again while the
    /// directory is live does nothing; after it went stale it reopens.
    pub async fn start(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        self.ensure_directory(&mut session)
    }

    /// Make `conversation_id` the active conversation. The previous one's
    /// typing flag is cleared and its feeds cancelled before anything new
    /// is opened.
    pub async fn select(&self, conversation_id: &str) -> Result<()> {
        if conversation_id.trim().is_empty() {
            return Err(InboxError::validation("no conversation to select"));
        }

        let mut session = self.session.lock().await;
        // The directory heals unread increments that race the stream's mark-read
        self.ensure_directory(&mut session)?;
        if let Some(active) = &session.active {
            if active.conversation_id == conversation_id && active.stream.is_open() {
                return Ok(());
            }
        }
        self.deactivate(&mut session).await;

        {
            let mut v = lock(&self.view);
            v.selected = Some(conversation_id.to_string());
            v.messages.clear();
            v.messages_stale = false;
            v.typing.clear();
        }

        let debouncer = Arc::new(TypingDebouncer::new(
            self.typing.clone(),
            conversation_id,
            self.config.typing_idle_timeout,
        ));
        {
            let mut composer = lock(&self.composer);
            composer.conversation_id = Some(conversation_id.to_string());
            composer.draft.clear();
            composer.debouncer = Some(debouncer.clone());
        }

        let stream = self.open_stream(conversation_id)?;
        let typing_feed = self.open_typing_feed(conversation_id);

        info!("{} opened {}", self.identity.participant_id, conversation_id);
        session.active = Some(ActiveConversation {
            conversation_id: conversation_id.to_string(),
            stream,
            typing_feed,
            debouncer,
        });
        Ok(())
    }

    /// Find or create the conversation with `counterpart` and select it
    pub async fn open_conversation_with(
        &self,
        counterpart: &str,
        listing: Option<ListingContext>,
    ) -> Result<Conversation> {
        let conversation = get_or_create_conversation(
            self.store.as_ref(),
            &self.identity.participant_id,
            counterpart,
            listing,
        )
        .await?;
        self.select(&conversation.id).await?;
        Ok(conversation)
    }

    /// New input text. Non-blank text counts as a keystroke; clearing the
    /// input drops the typing flag.
    pub async fn input(&self, text: &str) -> Result<()> {
        let debouncer = {
            let mut composer = lock(&self.composer);
            let debouncer = composer
                .debouncer
                .clone()
                .ok_or_else(|| InboxError::validation("no active conversation"))?;
            composer.draft.set(text);
            debouncer
        };

        if text.trim().is_empty() {
            debouncer.clear().await;
        } else {
            debouncer.keystroke();
        }
        Ok(())
    }

    /// The input lost focus
    pub async fn blur(&self) {
        let debouncer = lock(&self.composer).debouncer.clone();
        if let Some(debouncer) = debouncer {
            debouncer.clear().await;
        }
    }

    /// Send the current draft.
    ///
    /// Blank drafts and missing selection are rejected before any store call.
    /// The typing flag is cleared and the draft emptied before the write; if
    /// the write fails the draft comes back and `SendFailed` is emitted. The
    /// message reaches `view().messages` through the stream, not from here.
    pub async fn send(&self) -> Result<Message> {
        // Held so the selection cannot change mid-send
        let _session = self.session.lock().await;

        let (conversation_id, debouncer, outgoing) = {
            let mut composer = lock(&self.composer);
            let conversation_id = composer
                .conversation_id
                .clone()
                .ok_or_else(|| InboxError::validation("no active conversation"))?;
            let debouncer = composer
                .debouncer
                .clone()
                .ok_or_else(|| InboxError::validation("no active conversation"))?;
            let outgoing = composer.draft.take_for_send()?;
            (conversation_id, debouncer, outgoing)
        };

        let request = match SendRequest::new(
            &conversation_id,
            &self.identity.participant_id,
            &outgoing.body,
        ) {
            Ok(request) => request,
            Err(e) => {
                self.restore_draft(outgoing);
                return Err(e);
            }
        };

        debouncer.clear().await;

        match send_message(&self.store, request).await {
            Ok(message) => {
                lock(&self.view).last_error = None;
                Ok(message)
            }
            Err(e) => {
                let kind = e.send_error_kind();
                error!("Send to {} failed: {}", conversation_id, e);
                self.restore_draft(outgoing);
                lock(&self.view).last_error = Some(kind.user_message().to_string());
                emit(
                    &self.events,
                    InboxEvent::SendFailed {
                        conversation_id,
                        kind,
                        message: kind.user_message().to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Profile of the other participant in `conversation_id`
    pub async fn counterpart_profile(&self, conversation_id: &str) -> Result<Profile> {
        let known = lock(&self.view)
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned();
        let conversation = match known {
            Some(c) => c,
            None => self
                .store
                .get_conversation(conversation_id)
                .await?
                .ok_or_else(|| InboxError::NotFound(format!("conversation {}", conversation_id)))?,
        };

        match &self.profiles {
            Some(profiles) => Ok(profiles.counterpart_profile(&conversation).await),
            None => {
                let other = conversation
                    .counterpart_of(&self.identity.participant_id)
                    .unwrap_or(self.identity.participant_id.as_str());
                Ok(Profile::placeholder(other))
            }
        }
    }

    /// Tear everything down: typing flag cleared, all feeds cancelled.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        self.deactivate(&mut session).await;
        if let Some(mut directory) = session.directory.take() {
            directory.close();
        }
        debug!("Inbox for {} shut down", self.identity.participant_id);
    }

    fn ensure_directory(&self, session: &mut Session) -> Result<()> {
        if session.directory.as_ref().map(|d| d.is_open()).unwrap_or(false) {
            return Ok(());
        }
        if let Some(profiles) = &self.profiles {
            profiles.remember_viewer();
        }

        let view = self.view.clone();
        let events = self.events.clone();
        let tracker = self.read_state.clone();
        let viewer = self.identity.participant_id.clone();

        let directory = ConversationDirectory::open(
            self.store.as_ref(),
            &self.identity.participant_id,
            move |state| {
                let caught_up = {
                    let mut v = lock(&view);
                    v.conversations = state.conversations.clone();
                    v.directory_stale = state.stale;
                    caught_up_unread(&v, state, &viewer)
                };

                if state.stale {
                    emit(&events, InboxEvent::Stale { feed: Feed::Conversations });
                    return;
                }
                emit(
                    &events,
                    InboxEvent::ConversationsUpdated {
                        count: state.conversations.len(),
                        unread_total: state.unread_total(&viewer),
                    },
                );

                // Catches increments that landed after the stream's last mark-read
                if let Some(cid) = caught_up {
                    tracker.mark_read_detached(&cid, &viewer);
                }
            },
        )?;

        info!("Inbox started for {}", self.identity.participant_id);
        session.directory = Some(directory);
        Ok(())
    }

    async fn deactivate(&self, session: &mut Session) {
        let Some(mut active) = session.active.take() else {
            return;
        };

        // Detach first so no keystroke can reach the old debouncer
        {
            let mut composer = lock(&self.composer);
            composer.conversation_id = None;
            composer.debouncer = None;
            composer.draft.clear();
        }
        active.debouncer.clear().await;
        active.stream.close();
        active.typing_feed.cancel();

        let mut v = lock(&self.view);
        v.selected = None;
        v.messages.clear();
        v.messages_stale = false;
        v.typing.clear();
        debug!("Left {}", active.conversation_id);
    }

    fn open_stream(&self, conversation_id: &str) -> Result<MessageStream> {
        let view = self.view.clone();
        let events = self.events.clone();
        let tracker = self.read_state.clone();
        let viewer = self.identity.participant_id.clone();
        let cid = conversation_id.to_string();

        MessageStream::open(self.store.as_ref(), conversation_id, move |update| match update {
            StreamUpdate::Snapshot { messages, scroll } => {
                {
                    let mut v = lock(&view);
                    if v.selected.as_deref() != Some(cid.as_str()) {
                        return;
                    }
                    v.messages = messages.to_vec();
                    v.messages_stale = false;
                }
                emit(
                    &events,
                    InboxEvent::MessagesUpdated {
                        conversation_id: cid.clone(),
                        count: messages.len(),
                    },
                );
                if let Some(reason) = scroll {
                    emit(
                        &events,
                        InboxEvent::ScrollToBottom {
                            conversation_id: cid.clone(),
                            reason,
                        },
                    );
                }
                if !messages.is_empty() {
                    tracker.mark_read_detached(&cid, &viewer);
                }
            }
            StreamUpdate::Stale(_) => {
                lock(&view).messages_stale = true;
                emit(&events, InboxEvent::Stale { feed: Feed::Messages });
            }
        })
    }

    fn open_typing_feed(&self, conversation_id: &str) -> Subscription {
        let view = self.view.clone();
        let events = self.events.clone();
        let cid = conversation_id.to_string();

        self.typing.subscribe(conversation_id, move |participants| {
            {
                let mut v = lock(&view);
                if v.selected.as_deref() != Some(cid.as_str()) {
                    return;
                }
                v.typing = participants.clone();
            }
            emit(
                &events,
                InboxEvent::TypingChanged {
                    conversation_id: cid.clone(),
                    participants,
                },
            );
        })
    }

    fn restore_draft(&self, outgoing: Outgoing) {
        let mut composer = lock(&self.composer);
        if composer.draft.is_blank() {
            composer.draft.restore(outgoing);
        } else {
            // Typed again while the send was in flight; keep both
            let typed = composer.draft.text().to_string();
            composer.draft.set(format!("{}\n{}", outgoing.original, typed));
        }
    }
}

/// The selected conversation, if it shows unread messages for `viewer` that
/// are all already on screen
fn caught_up_unread(view: &InboxView, state: &DirectoryState, viewer: &str) -> Option<String> {
    if view.messages_stale {
        return None;
    }
    let cid = view.selected.as_deref()?;
    let conversation = state.find(cid)?;
    let newest_shown = view.messages.last()?;
    let all_shown = newest_shown.timestamp >= conversation.last_message_at;
    if conversation.unread_for(viewer) > 0 && all_shown {
        Some(cid.to_string())
    } else {
        None
    }
}

fn emit(events: &broadcast::Sender<InboxEvent>, event: InboxEvent) {
    // No receivers is fine
    let _ = events.send(event);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
