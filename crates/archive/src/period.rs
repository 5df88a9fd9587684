//! Calendar periods used to partition the archive
//!
//! A [`PeriodKind`] decides how instants are truncated, how partition
//! directories are named and how far one step of arithmetic moves. All
//! calculations happen in UTC.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Granularity of archive partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Year,
    Month,
    Day,
}

/// A signed number of calendar periods
///
/// Months and years are added on the calendar, so one month after
/// `2020-01-01` is `2020-02-01` regardless of the month's length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    kind: PeriodKind,
    count: i64,
}

impl Interval {
    pub fn kind(&self) -> PeriodKind {
        self.kind
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    fn apply(&self, instant: DateTime<Utc>, sign: i64) -> DateTime<Utc> {
        let count = self.count * sign;
        match self.kind {
            PeriodKind::Day => instant + TimeDelta::days(count),
            PeriodKind::Month => shift_months(instant, count),
            PeriodKind::Year => shift_months(instant, count * 12),
        }
    }
}

impl Add<Interval> for DateTime<Utc> {
    type Output = DateTime<Utc>;

    fn add(self, rhs: Interval) -> DateTime<Utc> {
        rhs.apply(self, 1)
    }
}

impl Sub<Interval> for DateTime<Utc> {
    type Output = DateTime<Utc>;

    fn sub(self, rhs: Interval) -> DateTime<Utc> {
        rhs.apply(self, -1)
    }
}

fn shift_months(instant: DateTime<Utc>, months: i64) -> DateTime<Utc> {
    let magnitude = Months::new(months.unsigned_abs().min(u32::MAX as u64) as u32);
    if months >= 0 {
        instant + magnitude
    } else {
        instant - magnitude
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

impl PeriodKind {
    /// Truncate to the start of the enclosing year, month or day
    pub fn floor(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let date = instant.date_naive();
        let start = match self {
            PeriodKind::Year => date - Days::new(date.ordinal0().into()),
            PeriodKind::Month => date - Days::new(date.day0().into()),
            PeriodKind::Day => date,
        };
        midnight(start)
    }

    /// The instant itself when it is a boundary, otherwise the next boundary
    pub fn ceil(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.floor(instant);
        if floor == instant {
            instant
        } else {
            floor + self.as_interval(1)
        }
    }

    /// `count` periods of this kind, for use with `+` and `-` on instants
    pub fn as_interval(&self, count: i64) -> Interval {
        Interval { kind: *self, count }
    }

    /// Number of whole periods from `from` to `to` (negative when `to` is earlier)
    pub fn interval_count(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        let mut count = match self {
            PeriodKind::Day => return (to - from).num_days(),
            PeriodKind::Month => {
                i64::from(to.year() - from.year()) * 12 + i64::from(to.month0())
                    - i64::from(from.month0())
            }
            PeriodKind::Year => i64::from(to.year() - from.year()),
        };

        // Calendar fields overestimate when `to` sits earlier within its period
        if count > 0 && from + self.as_interval(count) > to {
            count -= 1;
        } else if count < 0 && from + self.as_interval(count) < to {
            count += 1;
        }
        count
    }

    /// Canonical partition directory name for a boundary
    pub fn label(&self, boundary: DateTime<Utc>) -> String {
        boundary.format(self.label_format()).to_string()
    }

    /// Parse a partition directory name back into its boundary
    ///
    /// Returns `None` for anything that is not exactly a canonical label of
    /// this kind, so unrelated directory entries can be skipped.
    pub fn parse_label(&self, label: &str) -> Option<DateTime<Utc>> {
        let date = match self {
            PeriodKind::Year => {
                if label.len() != 4 || !label.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                NaiveDate::from_ymd_opt(label.parse().ok()?, 1, 1)?
            }
            PeriodKind::Month => NaiveDate::parse_from_str(&format!("{label}.01"), "%Y.%m.%d").ok()?,
            PeriodKind::Day => NaiveDate::parse_from_str(label, "%Y.%m.%d").ok()?,
        };

        let boundary = midnight(date);
        (self.label(boundary) == label).then_some(boundary)
    }

    /// Boundaries from `first` to `last` inclusive, one period apart
    pub fn boundaries(&self, first: DateTime<Utc>, last: DateTime<Utc>) -> Boundaries {
        Boundaries {
            kind: *self,
            next: self.floor(first),
            last,
        }
    }

    fn label_format(&self) -> &'static str {
        match self {
            PeriodKind::Year => "%Y",
            PeriodKind::Month => "%Y.%m",
            PeriodKind::Day => "%Y.%m.%d",
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeriodKind::Year => "year",
            PeriodKind::Month => "month",
            PeriodKind::Day => "day",
        };
        f.write_str(name)
    }
}

impl FromStr for PeriodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "year" | "y" => Ok(PeriodKind::Year),
            "month" | "m" => Ok(PeriodKind::Month),
            "day" | "d" => Ok(PeriodKind::Day),
            other => Err(format!("unknown period '{other}' (expected year, month or day)")),
        }
    }
}

/// Finite iterator over consecutive partition boundaries
#[derive(Debug, Clone)]
pub struct Boundaries {
    kind: PeriodKind,
    next: DateTime<Utc>,
    last: DateTime<Utc>,
}

impl Iterator for Boundaries {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.last {
            return None;
        }
        let current = self.next;
        self.next = current + self.kind.as_interval(1);
        Some(current)
    }
}
