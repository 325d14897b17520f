/// Error types for the inbox
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Missing index: {0}")]
    MissingIndex(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, InboxError>;

/// Why a send failed, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorKind {
    /// The store's access rules rejected the write
    PermissionDenied,
    /// The store lacks an index or capability the write path needs (operator action)
    MissingIndex,
    /// Anything else
    Other,
}

impl SendErrorKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            SendErrorKind::PermissionDenied => {
                "You don't have permission to send messages in this conversation."
            }
            SendErrorKind::MissingIndex => {
                "Messaging is temporarily unavailable while the service is being configured. Please try again later."
            }
            SendErrorKind::Other => "Your message could not be sent. Please try again.",
        }
    }
}

impl InboxError {
    /// Rejected locally before any store call.
    pub fn is_validation(&self) -> bool {
        matches!(self, InboxError::Validation(_))
    }

    pub fn send_error_kind(&self) -> SendErrorKind {
        match self {
            InboxError::PermissionDenied(_) => SendErrorKind::PermissionDenied,
            InboxError::MissingIndex(_) => SendErrorKind::MissingIndex,
            _ => SendErrorKind::Other,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        InboxError::Validation(msg.into())
    }
}
