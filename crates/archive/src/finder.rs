//! Locating the oldest partition with matching mail
//!
//! When no lower bound is configured, the archive needs to know where the
//! mailbox's history starts. The search asks one question of the remote side,
//! "does any match exist strictly before this boundary?", whose answer flips
//! from false to true exactly once going forward in time.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use log::debug;

use crate::config::SyncConfig;
use crate::period::PeriodKind;
use crate::query;
use crate::source::Mailbox;

/// Finds the boundary of the earliest period containing a match
pub struct OldestPeriodFinder {
    kind: PeriodKind,
    now: DateTime<Utc>,
    probes: usize,
}

impl OldestPeriodFinder {
    pub fn new(kind: PeriodKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            now,
            probes: 0,
        }
    }

    /// Number of probes issued by the last search
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Search the remote mailbox for the oldest period matching `config`
    pub fn find_in(&mut self, mailbox: &dyn Mailbox, config: &SyncConfig) -> Result<DateTime<Utc>> {
        self.find(|boundary| mailbox.exists(&query::exists_before(config, boundary)))
    }

    /// Search with an arbitrary "exists strictly before" probe
    ///
    /// Returns the current period's boundary when nothing precedes it,
    /// including when nothing matches at all.
    pub fn find<P>(&mut self, mut probe: P) -> Result<DateTime<Utc>>
    where
        P: FnMut(DateTime<Utc>) -> Result<bool>,
    {
        self.probes = 0;
        let base = self.kind.floor(self.now);
        let earliest = self.kind.floor(Utc.timestamp_opt(0, 0).single().unwrap_or(base));

        let mut check = |boundary: DateTime<Utc>, probes: &mut usize| -> Result<bool> {
            if boundary <= earliest {
                return Ok(false);
            }
            *probes += 1;
            let found = probe(boundary)?;
            debug!("Probe before {}: {}", boundary.format("%Y-%m-%d"), found);
            Ok(found)
        };

        if !check(base, &mut self.probes)? {
            return Ok(base);
        }

        // Bracket: f(base - upper) is true, f(base - lower) is false
        let mut upper: i64 = 0;
        let mut lower: i64 = 1;
        while check(base - self.kind.as_interval(lower), &mut self.probes)? {
            upper = lower;
            lower *= 2;
        }

        // Binary search over offsets from the false side; `lo` stays false and
        // `hi` stays true until they are adjacent
        let from = base - self.kind.as_interval(lower);
        let (mut lo, mut hi) = (0, lower - upper);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if check(from + self.kind.as_interval(mid), &mut self.probes)? {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        let oldest = from + self.kind.as_interval(lo);
        debug!(
            "Oldest {} with matches starts {} ({} probes)",
            self.kind,
            oldest.format("%Y-%m-%d"),
            self.probes
        );
        Ok(oldest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryMailbox;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn find_with_oldest(kind: PeriodKind, oldest: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut finder = OldestPeriodFinder::new(kind, now);
        finder.find(|boundary| Ok(oldest < boundary)).unwrap()
    }

    #[test]
    fn test_finds_floor_of_oldest_message() {
        let now = at(2024, 6, 15);
        for oldest in [at(2024, 5, 2), at(2023, 12, 31), at(2020, 1, 5), at(2001, 7, 19)] {
            for kind in [PeriodKind::Year, PeriodKind::Month, PeriodKind::Day] {
                assert_eq!(
                    find_with_oldest(kind, oldest, now),
                    kind.floor(oldest),
                    "{} search for {}",
                    kind,
                    oldest
                );
            }
        }
    }

    #[test]
    fn test_oldest_in_current_period() {
        let now = at(2024, 6, 15);
        let oldest = at(2024, 6, 3);
        assert_eq!(
            find_with_oldest(PeriodKind::Month, oldest, now),
            PeriodKind::Month.floor(now)
        );
    }

    #[test]
    fn test_oldest_in_previous_period() {
        let now = at(2024, 6, 15);
        assert_eq!(
            find_with_oldest(PeriodKind::Month, at(2024, 5, 31), now),
            PeriodKind::Month.floor(at(2024, 5, 1))
        );
    }

    #[test]
    fn test_no_matches_returns_current_period() {
        let now = at(2024, 6, 15);
        let mut finder = OldestPeriodFinder::new(PeriodKind::Day, now);
        let found = finder.find(|_| Ok(false)).unwrap();
        assert_eq!(found, PeriodKind::Day.floor(now));
        assert_eq!(finder.probes(), 1);
    }

    #[test]
    fn test_probe_count_is_logarithmic() {
        let now = at(2024, 6, 15);
        let oldest = at(2004, 2, 1);
        let mut finder = OldestPeriodFinder::new(PeriodKind::Day, now);
        finder.find(|boundary| Ok(oldest < boundary)).unwrap();
        // ~7300 days back: 14 doubling probes plus at most 13 bisection probes
        assert!(finder.probes() <= 30, "{} probes", finder.probes());
    }

    #[test]
    fn test_stops_at_epoch() {
        let now = at(2024, 6, 15);
        let mut finder = OldestPeriodFinder::new(PeriodKind::Year, now);
        let found = finder.find(|_| Ok(true)).unwrap();
        assert_eq!(found, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_probe_error_aborts() {
        let mut finder = OldestPeriodFinder::new(PeriodKind::Month, at(2024, 6, 15));
        let mut calls = 0;
        let result = finder.find(|_| {
            calls += 1;
            if calls == 3 {
                anyhow::bail!("quota exceeded");
            }
            Ok(true)
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_find_in_mailbox() {
        let mailbox = InMemoryMailbox::new();
        mailbox.add("a", at(2020, 1, 5), "first");
        mailbox.add("b", at(2020, 2, 10), "second");
        mailbox.add("c", at(2020, 3, 20), "third");

        let mut finder = OldestPeriodFinder::new(PeriodKind::Month, at(2020, 4, 15));
        let found = finder.find_in(&mailbox, &SyncConfig::new("")).unwrap();
        assert_eq!(found, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    }
}
