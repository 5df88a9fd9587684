//! Flat and partitioned archive sync
//!
//! A flat archive syncs the whole configured range in one pass. A partitioned
//! archive walks calendar periods oldest first; each period is synced with
//! the ids already committed to it and both neighbours excluded, because the
//! padded search window reaches across period boundaries.

use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{Level, debug, info, log, warn};

use crate::config::SyncConfig;
use crate::fetch::FetchPipeline;
use crate::finder::OldestPeriodFinder;
use crate::headers::parse_headers;
use crate::models::{Message, MessageId};
use crate::period::PeriodKind;
use crate::query;
use crate::source::{Mailbox, MessageIdSource};
use crate::storage::{Archive, Maildir, parse_id};

/// Options for a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of retrievals in flight
    pub concurrency: usize,
    /// Download and report, but write nothing
    pub dry_run: bool,
    /// Start from the configured lower bound (or the oldest match) again
    pub full_resync: bool,
    /// Number of periods before the latest partition to revisit
    pub resync_last: u32,
    /// Start from this instant instead of the latest partition
    pub since: Option<DateTime<Utc>>,
    /// Log every committed message at info level
    pub verbose: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            dry_run: false,
            full_resync: false,
            resync_last: 0,
            since: None,
            verbose: false,
        }
    }
}

/// Statistics from a sync operation
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    /// Ids returned by the searches, including ones already archived
    pub listed: usize,
    /// Messages retrieved from the remote mailbox
    pub downloaded: usize,
    /// Messages read back from the cache
    pub from_cache: usize,
    /// Messages moved into a maildir
    pub committed: usize,
    /// Fetched messages left in the cache for a later period or run
    pub uncommitted: usize,
    /// Partitions synced (1 for a flat archive)
    pub partitions: usize,
    /// Duration of the sync operation
    pub duration_ms: u64,
}

/// Progress of a single run
#[derive(Default)]
struct RunState {
    stats: SyncStats,
    /// Ids committed (or, in a dry run, reported) so far in this run
    archived: HashSet<MessageId>,
}

/// One sync of an archive against a remote mailbox
pub struct ArchiveSync<'a> {
    mailbox: &'a dyn Mailbox,
    archive: Archive,
    config: SyncConfig,
    options: SyncOptions,
    now: DateTime<Utc>,
}

impl<'a> ArchiveSync<'a> {
    pub fn new(
        mailbox: &'a dyn Mailbox,
        archive: Archive,
        config: SyncConfig,
        options: SyncOptions,
    ) -> Self {
        Self {
            mailbox,
            archive,
            config,
            options,
            now: Utc::now(),
        }
    }

    /// Use `now` as the current time
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn run(&self) -> Result<SyncStats> {
        let start = Instant::now();
        let mut state = RunState::default();

        if self.options.dry_run {
            warn!("Dry run: nothing will be written to {}", self.archive.root().display());
        } else {
            let removed = self.archive.prepare_cache()?;
            if removed > 0 {
                debug!("Removed {} incomplete downloads from the cache", removed);
            }
            let pruned = self.prune_cache()?;
            if pruned > 0 {
                debug!("Removed {} cached messages that will never be committed", pruned);
            }
        }

        match self.config.period {
            Some(kind) => self.sync_partitioned(kind, &mut state)?,
            None => self.sync_flat(&mut state)?,
        }

        let mut stats = state.stats;
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Archived {} messages ({} downloaded, {} from cache, {} left in cache) in {} ms",
            stats.committed, stats.downloaded, stats.from_cache, stats.uncommitted, stats.duration_ms
        );
        Ok(stats)
    }

    fn sync_flat(&self, state: &mut RunState) -> Result<()> {
        let maildir = self.archive.root_maildir();
        let index = maildir.fetched_ids()?;
        let query = query::build(&self.config, None, None);
        info!("Syncing '{}' ({} already archived)", query, index.len());

        state.stats.partitions += 1;
        self.sync_window(&query, index, state, |message| {
            self.config.contains(message.date).then(|| maildir.clone())
        })
    }

    fn sync_partitioned(&self, kind: PeriodKind, state: &mut RunState) -> Result<()> {
        let start = self.start_boundary(kind)?;
        let end = kind.ceil(self.config.before.unwrap_or(self.now));
        info!(
            "Syncing {} partitions {} to {}",
            kind,
            kind.label(start),
            kind.label(end)
        );

        for [prev, cur, next] in period_triples(kind, start, end) {
            let Some((window_start, window_end)) = window(&self.config, cur, next) else {
                debug!("Skipping {}: outside the configured range", kind.label(cur));
                continue;
            };

            let index = self.archive.fetched_ids_in(kind, &[prev, cur, next])?;
            let query = query::build(&self.config, Some(window_start), Some(window_end));
            info!("Syncing {} ({} already archived nearby)", kind.label(cur), index.len());
            debug!("Query: {}", query);

            state.stats.partitions += 1;
            self.sync_window(&query, index, state, |message| {
                let in_range = message.date < window_end
                    && self.config.after.is_none_or(|after| message.date >= after);
                in_range.then(|| self.archive.partition(kind, kind.floor(message.date)))
            })?;
        }
        Ok(())
    }

    /// First partition boundary to sync
    ///
    /// In order of priority: a full resync starts at the lower bound (or the
    /// oldest match), `since` starts there (never before the lower bound), an
    /// existing archive resumes at its latest partition less `resync_last`
    /// periods, and a fresh archive starts at the lower bound or oldest match.
    fn start_boundary(&self, kind: PeriodKind) -> Result<DateTime<Utc>> {
        let start = if self.options.full_resync {
            match self.config.after {
                Some(after) => after,
                None => self.find_oldest(kind)?,
            }
        } else if let Some(since) = self.options.since {
            self.config.after.map_or(since, |after| after.max(since))
        } else if let Some(latest) = self.archive.latest_partition(kind)? {
            latest - kind.as_interval(self.options.resync_last as i64)
        } else if let Some(after) = self.config.after {
            after
        } else {
            self.find_oldest(kind)?
        };
        Ok(kind.floor(start))
    }

    fn find_oldest(&self, kind: PeriodKind) -> Result<DateTime<Utc>> {
        let mut finder = OldestPeriodFinder::new(kind, self.now);
        let oldest = finder
            .find_in(self.mailbox, &self.config)
            .context("Failed to locate the oldest matching message")?;
        info!(
            "Oldest matching {} is {} ({} searches)",
            kind,
            kind.label(oldest),
            finder.probes()
        );
        Ok(oldest)
    }

    /// Fetch everything `query` lists outside `index` and commit each message
    /// to the maildir `target` picks; messages without a target stay cached
    ///
    /// Ids archived earlier in the run are skipped as well; a dry run never
    /// adds them to the on-disk index.
    fn sync_window<T>(
        &self,
        query: &str,
        mut index: HashSet<MessageId>,
        state: &mut RunState,
        target: T,
    ) -> Result<()>
    where
        T: Fn(&Message) -> Option<Maildir>,
    {
        index.extend(state.archived.iter().cloned());
        let index = &index;
        let archived = &mut state.archived;

        let listed = AtomicUsize::new(0);
        let ids = MessageIdSource::new(self.mailbox, query, |id: &MessageId| {
            listed.fetch_add(1, Ordering::Relaxed);
            !index.contains(id)
        });
        let pipeline = FetchPipeline::new(
            self.mailbox,
            self.archive.cache_dir(),
            self.options.concurrency,
            self.options.dry_run,
        );

        let mut committed = 0;
        let mut uncommitted = 0;
        let fetched = pipeline.run(ids, |message| {
            match target(&message) {
                Some(maildir) => {
                    if self.commit(&maildir, &message)? {
                        committed += 1;
                        archived.insert(message.id);
                    }
                }
                None => {
                    debug!("Keeping {} in cache ({})", message.id, message.date);
                    uncommitted += 1;
                }
            }
            Ok(())
        })?;

        let stats = &mut state.stats;
        stats.listed += listed.into_inner();
        stats.downloaded += fetched.downloaded;
        stats.from_cache += fetched.from_cache;
        stats.committed += committed;
        stats.uncommitted += uncommitted;
        Ok(())
    }

    /// Move a message into `maildir`; false when it was already there
    fn commit(&self, maildir: &Maildir, message: &Message) -> Result<bool> {
        let level = if self.options.verbose {
            Level::Info
        } else {
            Level::Debug
        };

        if maildir.committed_path(&message.id).exists() {
            debug!("{} is already in {}", message.id, maildir.path().display());
            if !self.options.dry_run
                && let Some(cached) = &message.local_path
            {
                fs::remove_file(cached)
                    .with_context(|| format!("Failed to remove {}", cached.display()))?;
            }
            return Ok(false);
        }

        if self.options.dry_run {
            log!(level, "Would archive {}", message.summary());
            return Ok(true);
        }

        maildir.commit(message)?;
        log!(level, "Archived {}", message.summary());
        Ok(true)
    }
}

impl ArchiveSync<'_> {
    /// Drop cached messages that no run will ever commit
    ///
    /// A cached message is dead when its date lies outside the configured
    /// range or its final file already exists. Everything else stays so an
    /// interrupted run resumes without downloading again. Unreadable entries
    /// are left alone; fetching them reports the problem with the message id.
    fn prune_cache(&self) -> Result<usize> {
        let cache = self.archive.cache_dir();
        let mut removed = 0;

        for entry in fs::read_dir(&cache)
            .with_context(|| format!("Failed to read cache {}", cache.display()))?
        {
            let path = entry?.path();
            let Some(id) = path.file_name().and_then(|n| n.to_str()).and_then(parse_id) else {
                continue;
            };
            let raw = fs::read(&path)
                .with_context(|| format!("Failed to read cached message {}", path.display()))?;
            let Ok(headers) = parse_headers(&raw) else {
                continue;
            };

            let dead = !self.config.contains(headers.date)
                || self.final_maildir(headers.date).committed_path(&id).exists();
            if dead {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                debug!("Dropped cached {} ({})", id, headers.date);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Maildir a message dated `date` ends up in
    fn final_maildir(&self, date: DateTime<Utc>) -> Maildir {
        match self.config.period {
            Some(kind) => self.archive.partition(kind, kind.floor(date)),
            None => self.archive.root_maildir(),
        }
    }
}

/// `(previous, current, next)` boundaries for every current period from
/// `start` to `end` inclusive
fn period_triples(
    kind: PeriodKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<[DateTime<Utc>; 3]> {
    let one = kind.as_interval(1);
    let boundaries: Vec<_> = kind.boundaries(start - one, end + one).collect();
    boundaries
        .windows(3)
        .map(|w| [w[0], w[1], w[2]])
        .collect()
}

/// Range of partition `[cur, next)` clipped to the configured bounds
fn window(
    config: &SyncConfig,
    cur: DateTime<Utc>,
    next: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = config.after.map_or(cur, |after| after.max(cur));
    let end = config.before.map_or(next, |before| before.min(next));
    (start < end).then_some((start, end))
}
