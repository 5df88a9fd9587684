//! Archive crate - incremental mirroring of a Gmail search into maildirs
//!
//! This crate provides:
//! - Calendar periods used to partition an archive (year, month, day)
//! - Search query construction with padded date bounds
//! - A lazy paginated id stream and a bounded-concurrency fetch pipeline
//! - Maildir storage with atomic commits and a resumable download cache
//! - The sync engine (flat or partitioned) and the oldest-period search
//! - Gmail API client and OAuth authentication
//!
//! Everything is synchronous; concurrency is limited to message retrieval.

pub mod config;
pub mod error;
pub mod fetch;
pub mod finder;
pub mod gmail;
pub mod headers;
pub mod models;
pub mod period;
pub mod query;
pub mod source;
pub mod storage;
pub mod sync;

pub use config::{ARCHIVE_CONFIG_FILE, GmailCredentials, SyncConfig};
pub use error::ArchiveError;
pub use fetch::{FetchPipeline, FetchStats};
pub use finder::OldestPeriodFinder;
pub use gmail::{GmailAuth, GmailClient};
pub use models::{Message, MessageId};
pub use period::{Interval, PeriodKind};
pub use source::{InMemoryMailbox, Mailbox, MessageIdSource, MessagePage};
pub use storage::{Archive, Maildir, filename_for, parse_id};
pub use sync::{ArchiveSync, SyncOptions, SyncStats};
