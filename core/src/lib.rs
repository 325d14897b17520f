/// Inbox - client-side messaging for a venue-booking marketplace
///
/// Live conversation directory, per-conversation message stream, typing
/// presence and unread bookkeeping on top of a document store with snapshot
/// subscriptions.

pub mod error;
pub mod config;
pub mod model;
pub mod events;
pub mod store;
pub mod local_store;
pub mod draft;
pub mod directory;
pub mod stream;
pub mod typing;
pub mod read_state;
pub mod messaging;
pub mod profile;
pub mod inbox;

pub use error::{InboxError, Result, SendErrorKind};
pub use config::Config;
pub use inbox::{Inbox, InboxView};
pub use store::{DocumentStore, MemoryStore};
