//! In-memory mailbox for testing and offline runs
//!
//! Evaluates a small subset of Gmail's search syntax (`after:`, `before:` and
//! `-in:chats`; other terms match everything) and can simulate the remote
//! API's ambiguous date boundaries, slow retrievals and failures.

use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};

use super::{Mailbox, MessagePage};
use crate::error::ArchiveError;
use crate::models::MessageId;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    date: DateTime<Utc>,
    raw: Vec<u8>,
}

/// Date filters of a parsed search query
#[derive(Debug, Default)]
struct SearchFilter {
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
}

impl SearchFilter {
    fn parse(query: &str) -> Result<Self> {
        let mut filter = Self::default();
        for term in query.split_whitespace() {
            if let Some(date) = term.strip_prefix("after:") {
                filter.after = Some(parse_search_date(date)?);
            } else if let Some(date) = term.strip_prefix("before:") {
                filter.before = Some(parse_search_date(date)?);
            }
        }
        Ok(filter)
    }

    fn matches(&self, date: DateTime<Utc>, skew: TimeDelta) -> bool {
        self.after.is_none_or(|after| date >= after + skew)
            && self.before.is_none_or(|before| date < before + skew)
    }
}

fn parse_search_date(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y/%m/%d")
        .map_err(|e| anyhow!("Invalid search date '{}': {}", value, e))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

/// Mailbox backed by a vector of synthetic messages
///
/// Listings return the newest messages first, like Gmail. With a boundary
/// skew configured, successive listings alternate between evaluating date
/// filters shifted forward and backward by the skew, so a message near a
/// boundary is sometimes included and sometimes not.
pub struct InMemoryMailbox {
    messages: RwLock<Vec<StoredMessage>>,
    page_size: usize,
    boundary_skew: TimeDelta,
    get_delay: Duration,
    listings: AtomicUsize,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_after_gets: AtomicUsize,
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            page_size: 100,
            boundary_skew: TimeDelta::zero(),
            get_delay: Duration::ZERO,
            listings: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail_after_gets: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Simulate boundary ambiguity of up to `hours` in either direction
    pub fn with_boundary_skew(mut self, hours: i64) -> Self {
        self.boundary_skew = TimeDelta::hours(hours);
        self
    }

    /// Make every retrieval take at least `delay`
    pub fn with_get_delay(mut self, delay: Duration) -> Self {
        self.get_delay = delay;
        self
    }

    /// Add a synthetic message with generated headers
    pub fn add(&self, id: &str, date: DateTime<Utc>, subject: &str) {
        let raw = format!(
            "From: Sender {id} <sender-{id}@example.com>\r\n\
             To: archive@example.com\r\n\
             Subject: {subject}\r\n\
             Date: {date}\r\n\
             Message-ID: <{id}@example.com>\r\n\
             \r\n\
             Body of message {id}.\r\n",
            date = date.to_rfc2822(),
        );
        self.add_raw(id, date, raw.into_bytes());
    }

    /// Add a message with explicit raw bytes; `date` drives search matching
    pub fn add_raw(&self, id: &str, date: DateTime<Utc>, raw: Vec<u8>) {
        let mut messages = self.messages.write().unwrap_or_else(|e| e.into_inner());
        messages.push(StoredMessage {
            id: MessageId::new(id),
            date,
            raw,
        });
        messages.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
    }

    /// Fail every retrieval after the first `count` ones
    pub fn fail_after_gets(&self, count: usize) {
        self.fail_after_gets
            .store(self.get_calls().saturating_add(count), Ordering::SeqCst);
    }

    /// Stop failing retrievals
    pub fn clear_failure(&self) {
        self.fail_after_gets.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Highest number of retrievals observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.list_calls.store(0, Ordering::SeqCst);
        self.get_calls.store(0, Ordering::SeqCst);
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Skew for a listing; the sign is fixed for all pages of one listing
    fn listing_skew(&self, page_token: Option<&str>) -> Result<(usize, TimeDelta)> {
        let Some(token) = page_token else {
            let listing = self.listings.fetch_add(1, Ordering::SeqCst);
            let skew = if listing % 2 == 0 {
                self.boundary_skew
            } else {
                -self.boundary_skew
            };
            return Ok((0, skew));
        };

        let (offset, minutes) = token
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid page token '{}'", token))?;
        Ok((
            offset.parse()?,
            TimeDelta::minutes(minutes.parse::<i64>()?),
        ))
    }
}

impl Mailbox for InMemoryMailbox {
    fn list(&self, query: &str, page_token: Option<&str>) -> Result<MessagePage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let filter = SearchFilter::parse(query)?;
        let (offset, skew) = self.listing_skew(page_token)?;

        let messages = self.messages.read().unwrap_or_else(|e| e.into_inner());
        let matching: Vec<&StoredMessage> = messages
            .iter()
            .filter(|m| filter.matches(m.date, skew))
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let ids = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|m| m.id.clone())
            .collect();
        let next_page_token =
            (end < matching.len()).then(|| format!("{}:{}", end, skew.num_minutes()));

        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    fn get_raw(&self, id: &MessageId) -> Result<Vec<u8>> {
        let call = self.get_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.get_delay.is_zero() {
            std::thread::sleep(self.get_delay);
        }

        let result: Result<Vec<u8>> = if call > self.fail_after_gets.load(Ordering::SeqCst) {
            Err(ArchiveError::remote("get", format!("simulated failure for {}", id)).into())
        } else {
            let messages = self.messages.read().unwrap_or_else(|e| e.into_inner());
            messages
                .iter()
                .find(|m| &m.id == id)
                .map(|m| m.raw.clone())
                .ok_or_else(|| ArchiveError::remote("get", format!("no message {}", id)).into())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
