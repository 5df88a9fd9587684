//! Maildir partitions and the archive root
//!
//! Directory structure of a partitioned archive:
//! ```text
//! root/
//!   gmarchive.json          # archive configuration
//!   tmp/                    # fetched but uncommitted messages
//!     18c2f0a1b2c3d4e5:2,S
//!   2020.01/
//!     cur/
//!       18a9e0f1c2d3b4a5:2,S
//!     new/
//!     tmp/
//!   2020.02/
//!     ...
//! ```
//! A flat archive is a single maildir at the root.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{Message, MessageId};
use crate::period::PeriodKind;

/// Info suffix of committed files: maildir format version 2, flag "seen"
pub const MAILDIR_SUFFIX: &str = ":2,S";

/// Extension of cache files that are still being written
const PARTIAL_EXTENSION: &str = "part";

/// File name under which a message is stored
pub fn filename_for(id: &MessageId) -> String {
    format!("{}{}", id.as_str(), MAILDIR_SUFFIX)
}

/// Recover the message id from a stored file name
pub fn parse_id(filename: &str) -> Option<MessageId> {
    filename
        .strip_suffix(MAILDIR_SUFFIX)
        .filter(|id| !id.is_empty())
        .map(MessageId::from)
}

/// A directory holding `cur`, `new` and `tmp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Maildir {
    path: PathBuf,
}

impl Maildir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cur(&self) -> PathBuf {
        self.path.join("cur")
    }

    pub fn new_dir(&self) -> PathBuf {
        self.path.join("new")
    }

    pub fn tmp(&self) -> PathBuf {
        self.path.join("tmp")
    }

    /// Whether the maildir skeleton is complete
    pub fn exists(&self) -> bool {
        self.cur().is_dir() && self.new_dir().is_dir() && self.tmp().is_dir()
    }

    /// Create the `cur`, `new` and `tmp` directories
    pub fn create(&self) -> Result<()> {
        for dir in [self.cur(), self.new_dir(), self.tmp()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create maildir directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Path a message has once committed here
    pub fn committed_path(&self, id: &MessageId) -> PathBuf {
        self.cur().join(filename_for(id))
    }

    /// Ids of all messages already committed to `cur`
    ///
    /// A missing maildir has no ids. Files without the canonical suffix are
    /// ignored.
    pub fn fetched_ids(&self) -> Result<HashSet<MessageId>> {
        let cur = self.cur();
        if !cur.is_dir() {
            return Ok(HashSet::new());
        }

        let mut ids = HashSet::new();
        for entry in fs::read_dir(&cur).with_context(|| format!("Failed to read {}", cur.display()))? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(parse_id) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Move a cached message into `cur`, creating the skeleton if needed
    ///
    /// The move is a single rename, so the message is either absent or fully
    /// present under its final name.
    pub fn commit(&self, message: &Message) -> Result<PathBuf> {
        let source = message
            .local_path
            .as_deref()
            .with_context(|| format!("Message {} has no local copy to commit", message.id))?;

        if !self.exists() {
            self.create()?;
        }

        let target = self.committed_path(&message.id);
        fs::rename(source, &target).with_context(|| {
            format!(
                "Failed to move {} to {}",
                source.display(),
                target.display()
            )
        })?;
        Ok(target)
    }
}

/// Root directory of an archive
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The root itself as a maildir (flat archives)
    pub fn root_maildir(&self) -> Maildir {
        Maildir::new(&self.root)
    }

    /// The partition directory for a boundary
    pub fn partition(&self, kind: PeriodKind, boundary: DateTime<Utc>) -> Maildir {
        Maildir::new(self.root.join(kind.label(boundary)))
    }

    /// Directory caching fetched messages that are not committed yet
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Boundaries of all existing partitions of a kind, oldest first
    pub fn partitions(&self, kind: PeriodKind) -> Result<Vec<DateTime<Utc>>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut boundaries = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read archive root {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(boundary) = entry.file_name().to_str().and_then(|n| kind.parse_label(n)) {
                boundaries.push(boundary);
            }
        }
        boundaries.sort();
        Ok(boundaries)
    }

    /// Boundary of the most recent partition, if any
    pub fn latest_partition(&self, kind: PeriodKind) -> Result<Option<DateTime<Utc>>> {
        Ok(self.partitions(kind)?.pop())
    }

    /// Union of committed ids over several partitions
    pub fn fetched_ids_in(
        &self,
        kind: PeriodKind,
        boundaries: &[DateTime<Utc>],
    ) -> Result<HashSet<MessageId>> {
        let mut ids = HashSet::new();
        for boundary in boundaries {
            ids.extend(self.partition(kind, *boundary).fetched_ids()?);
        }
        Ok(ids)
    }

    /// Create the cache directory and drop writes left over from an aborted run
    pub fn prepare_cache(&self) -> Result<usize> {
        let cache = self.cache_dir();
        fs::create_dir_all(&cache)
            .with_context(|| format!("Failed to create cache directory: {}", cache.display()))?;

        let mut removed = 0;
        for entry in fs::read_dir(&cache)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == PARTIAL_EXTENSION) {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Write a file so that it appears under `path` only once complete
pub fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".");
    partial.push(PARTIAL_EXTENSION);
    let partial = PathBuf::from(partial);
    fs::write(&partial, data)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    fs::rename(&partial, path)
        .with_context(|| format!("Failed to rename {} into place", partial.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn message_at(id: &str, path: PathBuf) -> Message {
        Message {
            id: MessageId::new(id),
            raw: None,
            subject: None,
            from: None,
            date: Utc.with_ymd_and_hms(2020, 1, 5, 0, 0, 0).unwrap(),
            local_path: Some(path),
        }
    }

    #[test]
    fn test_filename_round_trip() {
        for id in ["18c2f0a1b2c3d4e5", "a", "with.dots", "x:2,S"] {
            let id = MessageId::new(id);
            assert_eq!(parse_id(&filename_for(&id)), Some(id));
        }
        assert_eq!(filename_for(&MessageId::new("abc")), "abc:2,S");
    }

    #[test]
    fn test_parse_id_rejects_foreign_files() {
        assert_eq!(parse_id("abc"), None);
        assert_eq!(parse_id("abc:2,"), None);
        assert_eq!(parse_id(":2,S"), None);
        assert_eq!(parse_id("abc:2,S.part"), None);
    }

    #[test]
    fn test_create_and_exists() {
        let dir = tempdir().unwrap();
        let maildir = Maildir::new(dir.path().join("box"));

        assert!(!maildir.exists());
        maildir.create().unwrap();
        assert!(maildir.exists());
        assert!(maildir.cur().is_dir());
        assert!(maildir.new_dir().is_dir());
        assert!(maildir.tmp().is_dir());
    }

    #[test]
    fn test_fetched_ids_missing_maildir_is_empty() {
        let dir = tempdir().unwrap();
        let maildir = Maildir::new(dir.path().join("absent"));
        assert!(maildir.fetched_ids().unwrap().is_empty());
    }

    #[test]
    fn test_commit_moves_cached_file() {
        let dir = tempdir().unwrap();
        let archive = Archive::new(dir.path());
        archive.prepare_cache().unwrap();

        let cached = archive.cache_dir().join(filename_for(&MessageId::new("m1")));
        fs::write(&cached, b"Date: x\r\n\r\n").unwrap();

        let january = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let maildir = archive.partition(PeriodKind::Month, january);
        let target = maildir.commit(&message_at("m1", cached.clone())).unwrap();

        assert!(!cached.exists());
        assert!(target.exists());
        assert!(target.ends_with("2020.01/cur/m1:2,S"));
        let ids = maildir.fetched_ids().unwrap();
        assert!(ids.contains(&MessageId::new("m1")));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_commit_without_local_copy_fails() {
        let dir = tempdir().unwrap();
        let maildir = Maildir::new(dir.path());
        let mut message = message_at("m1", PathBuf::new());
        message.local_path = None;

        assert!(maildir.commit(&message).is_err());
        assert!(!maildir.exists());
    }

    #[test]
    fn test_partitions_skip_unrelated_entries() {
        let dir = tempdir().unwrap();
        for name in ["2020.03", "2019.12", "tmp", "2020", "notes.2020.01"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("2020.04"), b"a file, not a partition").unwrap();

        let archive = Archive::new(dir.path());
        let months = archive.partitions(PeriodKind::Month).unwrap();
        assert_eq!(
            months,
            vec![
                Utc.with_ymd_and_hms(2019, 12, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap(),
            ]
        );
        assert_eq!(
            archive.latest_partition(PeriodKind::Year).unwrap(),
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_prepare_cache_removes_partial_writes() {
        let dir = tempdir().unwrap();
        let archive = Archive::new(dir.path());
        archive.prepare_cache().unwrap();

        let complete = archive.cache_dir().join("keep:2,S");
        write_atomically(&complete, b"data").unwrap();
        fs::write(archive.cache_dir().join("stale:2,S.part"), b"half").unwrap();

        assert_eq!(archive.prepare_cache().unwrap(), 1);
        assert!(complete.exists());
        assert_eq!(fs::read_dir(archive.cache_dir()).unwrap().count(), 1);
    }
}
