/// Events the inbox broadcasts to whatever renders it
use crate::error::SendErrorKind;
use serde::{Deserialize, Serialize};

/// Why the view should jump to the newest message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollReason {
    /// First non-empty snapshot after selecting a conversation
    InitialLoad,
    /// Snapshot grew after the initial load
    NewMessage,
}

/// Which live query went stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    Conversations,
    Messages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxEvent {
    /// The conversation list changed
    ConversationsUpdated { count: usize, unread_total: u32 },
    /// The selected conversation's messages changed
    MessagesUpdated { conversation_id: String, count: usize },
    ScrollToBottom {
        conversation_id: String,
        reason: ScrollReason,
    },
    /// Other participants typing in the selected conversation
    TypingChanged {
        conversation_id: String,
        participants: Vec<String>,
    },
    /// A send failed; the draft has been restored
    SendFailed {
        conversation_id: String,
        kind: SendErrorKind,
        message: String,
    },
    /// A live query stopped delivering
    Stale { feed: Feed },
}
