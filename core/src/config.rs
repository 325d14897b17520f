/// Configuration management
use crate::error::{InboxError, Result};
use crate::typing::DEFAULT_TYPING_IDLE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_COUNTERPART: &str = "host";

/// Inbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Signed-in participant
    pub participant_id: String,

    /// Display name handed over by the identity provider
    pub display_name: String,

    /// Who the demo session talks to
    pub counterpart_id: String,

    /// Optional listing the conversation is about
    pub listing: Option<String>,

    /// Quiet period before a typing flag drops
    pub typing_idle_timeout: Duration,

    /// Directory for the local cache (defaults to `.inbox/<participant>`)
    pub data_dir: Option<PathBuf>,

    /// Buffered inbox events per subscriber
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            participant_id: String::new(),
            display_name: String::new(),
            counterpart_id: DEFAULT_COUNTERPART.to_string(),
            listing: None,
            typing_idle_timeout: DEFAULT_TYPING_IDLE,
            data_dir: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Config for one participant with everything else defaulted
    pub fn for_participant(participant_id: impl Into<String>) -> Self {
        let participant_id = participant_id.into();
        Self {
            display_name: participant_id.clone(),
            participant_id,
            ..Default::default()
        }
    }

    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(InboxError::Config(format!(
                "Usage: {} <participant-id> [--name <name>] [--counterpart <id>] [--listing <id>] [--data-dir <path>] [--typing-timeout-ms <ms>]",
                args.first().map(String::as_str).unwrap_or("inbox")
            )));
        }

        let mut config = Self::for_participant(args[1].clone());

        let mut i = 2;
        while i < args.len() {
            let flag = args[i].as_str();
            let value = || {
                args.get(i + 1)
                    .cloned()
                    .ok_or_else(|| InboxError::Config(format!("{} requires a value", flag)))
            };
            match flag {
                "--name" => config.display_name = value()?,
                "--counterpart" => config.counterpart_id = value()?,
                "--listing" => config.listing = Some(value()?),
                "--data-dir" => config.data_dir = Some(PathBuf::from(value()?)),
                "--typing-timeout-ms" => {
                    config.typing_idle_timeout = parse_millis(&value()?)?;
                }
                other => {
                    return Err(InboxError::Config(format!("Unknown argument: {}", other)));
                }
            }
            i += 2;
        }

        // Env overrides (nice for scripts)
        if let Ok(ms) = std::env::var("INBOX_TYPING_TIMEOUT_MS") {
            config.typing_idle_timeout = parse_millis(&ms)?;
        }
        if let Ok(dir) = std::env::var("INBOX_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.participant_id.trim().is_empty() {
            return Err(InboxError::Config("participant id must not be empty".to_string()));
        }
        if self.typing_idle_timeout.is_zero() {
            return Err(InboxError::Config("typing timeout must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(InboxError::Config("event capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".inbox").join(&self.participant_id))
    }
}

fn parse_millis(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| InboxError::Config(format!("'{}' is not a number of milliseconds", raw)))
}
