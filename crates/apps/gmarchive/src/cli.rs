use std::path::PathBuf;

use archive::PeriodKind;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gmarchive", version, about = "Mirror a Gmail search into maildirs")]
pub(crate) struct Cli {
    /// Archive root directory
    #[arg(long, global = true, default_value = ".")]
    pub(crate) root: PathBuf,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the archive configuration
    Init(InitCmd),
    /// Download new messages into the archive
    Sync(SyncCmd),
    /// Sign in to Gmail and cache the tokens
    Login,
    /// Forget the cached Gmail tokens
    Logout,
}

#[derive(Args, Debug)]
pub(crate) struct InitCmd {
    /// Gmail search query to mirror
    #[arg(long)]
    pub(crate) query: String,
    /// Only archive messages dated at or after this date
    #[arg(long, value_parser = parse_date)]
    pub(crate) after: Option<DateTime<Utc>>,
    /// Only archive messages dated before this date
    #[arg(long, value_parser = parse_date)]
    pub(crate) before: Option<DateTime<Utc>>,
    /// Partition the archive by year, month or day
    #[arg(long)]
    pub(crate) period: Option<PeriodKind>,
    /// Replace an existing configuration
    #[arg(long)]
    pub(crate) force: bool,
}

#[derive(Args, Debug)]
pub(crate) struct SyncCmd {
    /// Number of messages downloaded in parallel
    #[arg(short = 'j', long = "jobs", default_value_t = 8)]
    pub(crate) jobs: usize,
    /// Download and report without writing anything
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Start again from the oldest period
    #[arg(long)]
    pub(crate) full_resync: bool,
    /// Revisit this many periods before the latest partition
    #[arg(long = "resync", default_value_t = 0)]
    pub(crate) resync: u32,
    /// Start from this date
    #[arg(long, value_parser = parse_date)]
    pub(crate) since: Option<DateTime<Utc>>,
    /// Log every archived message
    #[arg(short, long)]
    pub(crate) verbose: bool,
}

/// `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp
pub(crate) fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| format!("invalid date '{value}' (expected YYYY-MM-DD or RFC 3339)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_plain_date() {
        assert_eq!(
            parse_date("2020-04-01").unwrap(),
            Utc.with_ymd_and_hms(2020, 4, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_rfc3339_converts_to_utc() {
        assert_eq!(
            parse_date("2020-04-01T02:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2020, 4, 1, 0, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_invalid_date() {
        assert!(parse_date("01/04/2020").is_err());
        assert!(parse_date("2020-13-01").is_err());
    }

    #[test]
    fn test_sync_arguments() {
        let cli = Cli::parse_from([
            "gmarchive", "--root", "/tmp/mail", "sync", "-j", "4", "--resync", "2", "-v",
        ]);
        assert_eq!(cli.root, PathBuf::from("/tmp/mail"));
        match cli.command {
            Command::Sync(cmd) => {
                assert_eq!(cmd.jobs, 4);
                assert_eq!(cmd.resync, 2);
                assert!(cmd.verbose);
                assert!(!cmd.dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_init_arguments() {
        let cli = Cli::parse_from([
            "gmarchive", "init", "--query", "from:bank", "--after", "2019-01-01", "--period",
            "month",
        ]);
        match cli.command {
            Command::Init(cmd) => {
                assert_eq!(cmd.query, "from:bank");
                assert_eq!(cmd.period, Some(PeriodKind::Month));
                assert_eq!(cmd.after, Some(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()));
                assert!(cmd.before.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_login_command() {
        let cli = Cli::parse_from(["gmarchive", "login"]);
        assert!(matches!(cli.command, Command::Login));
        assert_eq!(cli.root, PathBuf::from("."));
    }
}
