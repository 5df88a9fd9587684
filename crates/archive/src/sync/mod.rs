//! Sync engine mirroring a search query into the archive
//!
//! Runs are resumable: everything fetched is cached before it is committed,
//! and committed messages are recognised by their file names on the next run.

mod archive;

pub use archive::{ArchiveSync, SyncOptions, SyncStats};
