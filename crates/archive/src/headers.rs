//! RFC 822 header extraction
//!
//! Only the handful of headers the archive needs are pulled out of the raw
//! message: `Subject` and `From` for logging, `Date` for partition placement.

use chrono::{DateTime, Utc};

/// Headers extracted from a raw message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeaders {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: DateTime<Utc>,
}

/// Parse the header block of a raw message
///
/// The block ends at the first blank line. Errors are plain descriptions; the
/// caller attaches the message id.
pub fn parse_headers(raw: &[u8]) -> Result<MessageHeaders, String> {
    let block = String::from_utf8_lossy(header_block(raw));
    let lines = unfold(&block)?;

    let mut subject = None;
    let mut from = None;
    let mut date = None;

    for line in &lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("malformed header line '{}'", line))?;
        let value = value.trim().to_string();
        let slot = match name.trim() {
            n if n.eq_ignore_ascii_case("Subject") => &mut subject,
            n if n.eq_ignore_ascii_case("From") => &mut from,
            n if n.eq_ignore_ascii_case("Date") => &mut date,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    let date = date.ok_or_else(|| "missing Date header".to_string())?;
    Ok(MessageHeaders {
        subject,
        from,
        date: parse_date(&date)?,
    })
}

/// Bytes up to (not including) the first blank line
fn header_block(raw: &[u8]) -> &[u8] {
    let mut start = 0;
    while start < raw.len() {
        let end = raw[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(raw.len(), |p| start + p);
        let line = &raw[start..end];
        if line.is_empty() || line == b"\r" {
            return &raw[..start];
        }
        start = end + 1;
    }
    raw
}

/// Join folded header lines into logical lines
///
/// A line starting with whitespace continues the previous one; it is appended
/// after a single space with its leading whitespace removed.
pub fn unfold(block: &str) -> Result<Vec<String>, String> {
    let mut lines: Vec<String> = Vec::new();

    for line in block.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            let previous = lines
                .last_mut()
                .ok_or_else(|| "continuation line before the first header".to_string())?;
            previous.push(' ');
            previous.push_str(line.trim_start());
        } else {
            lines.push(line.to_string());
        }
    }

    Ok(lines)
}

/// Parse an RFC 822 Date header value
///
/// Accepts a numeric offset (`+0200`) or a named zone (`GMT`, `PDT`, ...).
/// A trailing parenthesized comment such as `(UTC)` is ignored.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    let cleaned = strip_comment(value);
    parse_numeric_zone(&cleaned)
        .or_else(|| parse_named_zone(&cleaned))
        .ok_or_else(|| format!("unrecognized Date header '{}'", value.trim()))
}

fn strip_comment(value: &str) -> String {
    let mut value = value.trim();
    if value.ends_with(')')
        && let Some(open) = value.rfind('(')
    {
        value = value[..open].trim_end();
    }
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_numeric_zone(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_named_zone(value: &str) -> Option<DateTime<Utc>> {
    let (rest, zone) = value.rsplit_once(' ')?;
    let offset = named_zone_offset(zone)?;
    parse_numeric_zone(&format!("{} {}", rest, offset))
}

fn named_zone_offset(zone: &str) -> Option<&'static str> {
    let offset = match zone.to_ascii_uppercase().as_str() {
        "UT" | "UTC" | "GMT" | "Z" => "+0000",
        "EST" => "-0500",
        "EDT" => "-0400",
        "CST" => "-0600",
        "CDT" => "-0500",
        "MST" => "-0700",
        "MDT" => "-0600",
        "PST" => "-0800",
        "PDT" => "-0700",
        _ => return None,
    };
    Some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unfold_continuation_lines() {
        let block = "Subject: a very\r\n   long subject\r\nFrom: someone\r\n\tat example\r\n";
        let lines = unfold(block).unwrap();
        assert_eq!(
            lines,
            vec!["Subject: a very long subject", "From: someone at example"]
        );
    }

    #[test]
    fn test_unfold_rejects_leading_continuation() {
        assert!(unfold("  orphan\r\nSubject: x\r\n").is_err());
    }

    #[test]
    fn test_parse_headers_stops_at_blank_line() {
        let raw = b"From: Alice <alice@example.com>\r\n\
                    Subject: Hello\r\n\
                    Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n\
                    \r\n\
                    Subject: not a header\r\n\
                    body text without colon\r\n";
        let headers = parse_headers(raw).unwrap();
        assert_eq!(headers.subject.as_deref(), Some("Hello"));
        assert_eq!(headers.from.as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(
            headers.date,
            Utc.with_ymd_and_hms(2003, 7, 1, 8, 52, 37).unwrap()
        );
    }

    #[test]
    fn test_parse_headers_case_insensitive_and_folded() {
        let raw = b"SUBJECT: folded\n subject\ndate: Sun, 5 Jan 2020 12:00:00 +0000\n\nbody";
        let headers = parse_headers(raw).unwrap();
        assert_eq!(headers.subject.as_deref(), Some("folded subject"));
        assert_eq!(headers.from, None);
    }

    #[test]
    fn test_parse_headers_missing_date() {
        let err = parse_headers(b"Subject: no date\r\n\r\nbody").unwrap_err();
        assert!(err.contains("Date"));
    }

    #[test]
    fn test_parse_headers_malformed_line() {
        assert!(parse_headers(b"Subject: ok\r\nnot a header\r\n\r\n").is_err());
    }

    #[test]
    fn test_parse_date_numeric_offset() {
        let date = parse_date("Tue, 31 Mar 2020 23:00:00 -0700").unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2020, 4, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_date_named_zone() {
        let expected = Utc.with_ymd_and_hms(2020, 3, 31, 23, 0, 0).unwrap();
        assert_eq!(parse_date("Tue, 31 Mar 2020 23:00:00 UTC").unwrap(), expected);
        assert_eq!(parse_date("Tue, 31 Mar 2020 23:00:00 GMT").unwrap(), expected);
        assert_eq!(
            parse_date("Tue, 31 Mar 2020 16:00:00 PDT").unwrap(),
            expected
        );
    }

    #[test]
    fn test_parse_date_ignores_comment() {
        let date = parse_date("Sun, 3 Nov 2019 08:15:00 +0000 (UTC)").unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2019, 11, 3, 8, 15, 0).unwrap());
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date("yesterday at noon").is_err());
        assert!(parse_date("Tue, 31 Mar 2020 23:00:00 XYZ").is_err());
    }
}
