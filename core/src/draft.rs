/// In-progress composition for the active conversation. Memory only.
use crate::error::{InboxError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    text: String,
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Take the draft for sending and leave it empty.
    /// A blank draft is rejected and left untouched.
    pub fn take_for_send(&mut self) -> Result<Outgoing> {
        let body = validate_body(&self.text)?;
        let original = std::mem::take(&mut self.text);
        Ok(Outgoing { original, body })
    }

    /// Put back the text of a send that failed
    pub fn restore(&mut self, outgoing: Outgoing) {
        self.text = outgoing.original;
    }
}

/// Text taken out of the draft for one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Exactly what was in the input
    pub original: String,
    /// What gets written
    pub body: String,
}

/// Trimmed body, or a validation error when nothing is left
pub fn validate_body(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InboxError::validation("message body is empty"));
    }
    Ok(trimmed.to_string())
}
