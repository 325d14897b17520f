/// Shared types for the messaging layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role a participant plays in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Owner of the listing the conversation is about
    Host,
    /// Anyone else
    Guest,
}

/// Catalog listing a conversation is about (display only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingContext {
    pub listing_id: String,
    pub name: String,
    pub thumbnail_url: Option<String>,
    /// Participant who hosts the listing, if known
    pub host_id: Option<String>,
}

impl ListingContext {
    pub fn new(listing_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            name: name.into(),
            thumbnail_url: None,
            host_id: None,
        }
    }

    pub fn with_host(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }
}

/// One conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Opaque id, also the scope key for message and typing subscriptions
    pub id: String,
    /// Unique participant ids; order carries no meaning
    pub participants: Vec<String>,
    #[serde(default)]
    pub roles: HashMap<String, ParticipantRole>,
    pub listing: Option<ListingContext>,
    /// Preview of the last message. Display hint only, may lag the stream.
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub unread: HashMap<String, u32>,
}

impl Conversation {
    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.participants.iter().any(|p| p == participant_id)
    }

    pub fn unread_for(&self, participant_id: &str) -> u32 {
        self.unread.get(participant_id).copied().unwrap_or(0)
    }

    pub fn role_of(&self, participant_id: &str) -> Option<ParticipantRole> {
        self.roles.get(participant_id).copied()
    }

    /// First participant that is not `viewer`. For a conversation with only
    /// the viewer in it, the viewer themselves.
    pub fn counterpart_of(&self, viewer: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != viewer)
            .or_else(|| self.participants.iter().map(String::as_str).find(|p| *p == viewer))
    }

    /// Same unordered participant set as `{a, b}`
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        self.participants.len() == 2 && self.has_participant(a) && self.has_participant(b)
    }

    pub fn listing_id(&self) -> Option<&str> {
        self.listing.as_ref().map(|l| l.listing_id.as_str())
    }
}

/// Fields for a conversation the store has not created yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConversation {
    pub participants: Vec<String>,
    pub roles: HashMap<String, ParticipantRole>,
    pub listing: Option<ListingContext>,
}

/// One immutable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    /// Assigned by the store; the only ordering key
    pub timestamp: DateTime<Utc>,
}

/// Presence document for one participant in one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEntry {
    pub conversation_id: String,
    pub participant_id: String,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

/// Change to a participant's unread counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "by", rename_all = "snake_case")]
pub enum UnreadOp {
    Increment(u32),
    Reset,
}

impl UnreadOp {
    pub fn apply(&self, current: u32) -> u32 {
        match self {
            UnreadOp::Increment(n) => current.saturating_add(*n),
            UnreadOp::Reset => 0,
        }
    }
}

/// Partial update merged into a conversation document.
/// Unread entries are per participant so writers never touch each other's keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPatch {
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread: HashMap<String, UnreadOp>,
}

/// Display fields for a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub participant_id: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

impl Profile {
    /// Placeholder shown when nothing better is known
    pub fn placeholder(participant_id: &str) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            display_name: participant_id.to_string(),
            photo_url: None,
        }
    }
}

/// The signed-in user, as handed over by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub participant_id: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(participant_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            photo_url: None,
        }
    }

    pub fn profile(&self) -> Profile {
        Profile {
            participant_id: self.participant_id.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(participants: &[&str]) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: "c".to_string(),
            participants: participants.iter().map(|p| p.to_string()).collect(),
            roles: HashMap::new(),
            listing: None,
            last_message: String::new(),
            last_message_at: now,
            created_at: now,
            unread: HashMap::new(),
        }
    }

    #[test]
    fn test_counterpart() {
        assert_eq!(with(&["me", "you"]).counterpart_of("me"), Some("you"));
        assert_eq!(with(&["you", "me"]).counterpart_of("me"), Some("you"));
        assert_eq!(with(&["me"]).counterpart_of("me"), Some("me"));
        assert_eq!(with(&[]).counterpart_of("me"), None);
    }

    #[test]
    fn test_is_between_ignores_order_and_groups() {
        assert!(with(&["a", "b"]).is_between("b", "a"));
        assert!(!with(&["a", "b", "c"]).is_between("a", "b"));
        assert!(!with(&["a", "c"]).is_between("a", "b"));
    }

    #[test]
    fn test_unread_ops() {
        assert_eq!(UnreadOp::Increment(1).apply(4), 5);
        assert_eq!(UnreadOp::Increment(1).apply(u32::MAX), u32::MAX);
        assert_eq!(UnreadOp::Reset.apply(9), 0);
    }
}
