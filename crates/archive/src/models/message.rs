//! Message model for a mail fetched from the remote mailbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Unique identifier for a message (Gmail message ID)
///
/// Opaque to the archive; it is only ever compared and embedded in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A fetched message with the headers needed for placement and display
#[derive(Debug, Clone)]
pub struct Message {
    /// Gmail message ID
    pub id: MessageId,
    /// Raw RFC 822 bytes, when held in memory
    pub raw: Option<Vec<u8>>,
    /// Unfolded Subject header
    pub subject: Option<String>,
    /// Unfolded From header
    pub from: Option<String>,
    /// Parsed Date header
    pub date: DateTime<Utc>,
    /// Where the message currently lives on disk (cache or final location)
    pub local_path: Option<PathBuf>,
}

impl Message {
    /// One-line description used in commit logs
    pub fn summary(&self) -> String {
        format!(
            "{} | {} | {}",
            self.date.format("%Y-%m-%d %H:%M"),
            self.from.as_deref().unwrap_or("(unknown sender)"),
            self.subject.as_deref().unwrap_or("(no subject)"),
        )
    }
}
