//! Gmail search query construction
//!
//! Gmail evaluates `after:` and `before:` dates in a timezone the caller does
//! not control, so bounds are padded by one day on each side. Callers must
//! re-filter fetched messages against the exact window.

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::SyncConfig;
use crate::period::PeriodKind;

/// Search term excluding Hangouts/Chat transcripts
const EXCLUDE_CHATS: &str = "-in:chats";

fn search_date(instant: DateTime<Utc>) -> String {
    instant.format("%Y/%m/%d").to_string()
}

/// Build the search query for a date window
///
/// `after` and `before` override the configured bounds when given.
pub fn build(
    config: &SyncConfig,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
) -> String {
    let mut terms = vec![config.query.trim().to_string()];

    if let Some(after) = after.or(config.after) {
        let padded = PeriodKind::Day.floor(after) - TimeDelta::days(1);
        terms.push(format!("after:{}", search_date(padded)));
    }
    if let Some(before) = before.or(config.before) {
        let padded = PeriodKind::Day.ceil(before) + TimeDelta::days(1);
        terms.push(format!("before:{}", search_date(padded)));
    }
    terms.push(EXCLUDE_CHATS.to_string());

    join_terms(terms)
}

/// Query matching any message dated strictly before `boundary`
///
/// Unpadded: used to probe for the oldest partition, where only the answer's
/// monotonicity matters.
pub fn exists_before(config: &SyncConfig, boundary: DateTime<Utc>) -> String {
    join_terms(vec![
        config.query.trim().to_string(),
        format!("before:{}", search_date(boundary)),
        EXCLUDE_CHATS.to_string(),
    ])
}

fn join_terms(terms: Vec<String>) -> String {
    terms
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
