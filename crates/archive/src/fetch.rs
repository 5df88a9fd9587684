//! Bounded-concurrency message retrieval
//!
//! Ids are pulled lazily from their source and retrieved on a dedicated pool
//! of `concurrency` threads, so at most that many remote calls are in flight.
//! Every retrieved message is written to the cache directory before it is
//! handed downstream; an interrupted run therefore finds it on disk next time
//! instead of downloading it again.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use anyhow::{Context, Result, anyhow};
use log::debug;
use rayon::prelude::*;

use crate::error::ArchiveError;
use crate::headers::parse_headers;
use crate::models::{Message, MessageId};
use crate::source::Mailbox;
use crate::storage::{filename_for, write_atomically};

/// Counters from one pipeline run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    /// Messages retrieved from the remote mailbox
    pub downloaded: usize,
    /// Messages read back from the cache directory
    pub from_cache: usize,
}

impl FetchStats {
    pub fn total(&self) -> usize {
        self.downloaded + self.from_cache
    }
}

/// Retrieves message bodies for a stream of ids
pub struct FetchPipeline<'a> {
    mailbox: &'a dyn Mailbox,
    cache_dir: PathBuf,
    concurrency: usize,
    dry_run: bool,
}

impl<'a> FetchPipeline<'a> {
    pub fn new(
        mailbox: &'a dyn Mailbox,
        cache_dir: impl Into<PathBuf>,
        concurrency: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            mailbox,
            cache_dir: cache_dir.into(),
            concurrency: concurrency.max(1),
            dry_run,
        }
    }

    /// Retrieve every id and pass the resulting messages to `sink`
    ///
    /// `sink` runs on the calling thread, one message at a time, in completion
    /// order. The first error from the id source, a retrieval, header parsing
    /// or `sink` stops the run and is returned.
    pub fn run<I, F>(&self, ids: I, mut sink: F) -> Result<FetchStats>
    where
        I: Iterator<Item = Result<MessageId>> + Send,
        F: FnMut(Message) -> Result<()>,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("fetch-{}", i))
            .build()
            .context("Failed to start fetch workers")?;

        let downloaded = AtomicUsize::new(0);
        let from_cache = AtomicUsize::new(0);
        let (tx, rx) = mpsc::sync_channel::<Message>(self.concurrency);

        let (produced, consumed) = std::thread::scope(|scope| {
            let workers = scope.spawn(|| {
                pool.install(|| {
                    ids.par_bridge().try_for_each_with(tx, |tx, id| {
                        let (message, cached) = self.fetch_one(id?)?;
                        let counter = if cached { &from_cache } else { &downloaded };
                        counter.fetch_add(1, Ordering::Relaxed);
                        tx.send(message)
                            .map_err(|_| anyhow!("Message consumer stopped"))
                    })
                })
            });

            let mut consumed = Ok(());
            for message in rx {
                if let Err(e) = sink(message) {
                    consumed = Err(e);
                    break;
                }
            }

            let produced = workers
                .join()
                .unwrap_or_else(|_| Err(anyhow!("Fetch worker panicked")));
            (produced, consumed)
        });

        // A sink failure makes the workers fail too; report the original error
        consumed?;
        produced?;

        Ok(FetchStats {
            downloaded: downloaded.into_inner(),
            from_cache: from_cache.into_inner(),
        })
    }

    /// Retrieve one message; the flag tells whether it came from the cache
    fn fetch_one(&self, id: MessageId) -> Result<(Message, bool)> {
        let cache_path = self.cache_dir.join(filename_for(&id));

        if cache_path.is_file() {
            let raw = fs::read(&cache_path)
                .with_context(|| format!("Failed to read cached message {}", cache_path.display()))?;
            debug!("Cache hit for {}", id);
            let message = build_message(id, raw, Some(cache_path))?;
            return Ok((message, true));
        }

        let raw = self.mailbox.get_raw(&id)?;
        debug!("Downloaded {} ({} bytes)", id, raw.len());

        let local_path = if self.dry_run {
            None
        } else {
            write_atomically(&cache_path, &raw)?;
            Some(cache_path)
        };
        let message = build_message(id, raw, local_path)?;
        Ok((message, false))
    }
}

fn build_message(id: MessageId, raw: Vec<u8>, local_path: Option<PathBuf>) -> Result<Message> {
    let headers = parse_headers(&raw).map_err(|reason| ArchiveError::parse(id.as_str(), reason))?;
    Ok(Message {
        id,
        raw: Some(raw),
        subject: headers.subject,
        from: headers.from,
        date: headers.date,
        local_path,
    })
}
