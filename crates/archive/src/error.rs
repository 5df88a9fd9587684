//! Error kinds surfaced by the sync engine
//!
//! Most functions return `anyhow::Result`; these typed errors travel inside
//! `anyhow::Error` so the binary can tell them apart with `downcast_ref`.

/// Failures that abort an archive run
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A listing or retrieval request to the remote mailbox failed
    #[error("Remote {operation} request failed: {message}")]
    Remote {
        operation: &'static str,
        message: String,
    },

    /// A message's header block or Date header could not be parsed
    #[error("Failed to parse message {id}: {reason}")]
    Parse { id: String, reason: String },

    /// Persisted configuration or credentials are missing or unusable
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ArchiveError {
    pub(crate) fn remote(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Remote {
            operation,
            message: err.to_string(),
        }
    }

    pub(crate) fn parse(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
