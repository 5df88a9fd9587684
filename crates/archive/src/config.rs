//! Configuration loading for the archiver
//!
//! Two kinds of configuration live here:
//! - OAuth client credentials for Gmail API access, loaded (in order of
//!   priority) from compile-time variables, a Google Cloud Console JSON file,
//!   or runtime environment variables
//! - the per-archive [`SyncConfig`], persisted as JSON in the archive root

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;
use crate::period::PeriodKind;

/// Credentials filename in the gmarchive config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Archive configuration filename in the archive root
pub const ARCHIVE_CONFIG_FILE: &str = "gmarchive.json";

/// What an archive mirrors
///
/// Dates are stored as RFC 3339 instants in UTC so the archive means the same
/// thing regardless of the local timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Gmail search query
    pub query: String,
    /// Only messages dated at or after this instant
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
    /// Only messages dated strictly before this instant
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    /// Partition granularity; `None` keeps a single flat maildir
    #[serde(default)]
    pub period: Option<PeriodKind>,
}

impl SyncConfig {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            after: None,
            before: None,
            period: None,
        }
    }

    /// Path of the configuration file for an archive root
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(ARCHIVE_CONFIG_FILE)
    }

    /// Load the configuration of an archive
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path_in(root);
        if !path.exists() {
            return Err(ArchiveError::Configuration(format!(
                "no archive configuration at {} (run `gmarchive init` first)",
                path.display()
            ))
            .into());
        }
        config::load_json_file(&path)
    }

    /// Persist the configuration into an archive root
    pub fn save(&self, root: &Path) -> Result<()> {
        config::save_json_file(&Self::path_in(root), self)
    }

    /// Whether an instant falls inside `[after, before)`
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.after.is_none_or(|after| instant >= after)
            && self.before.is_none_or(|before| instant < before)
    }
}

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials from the first available source
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env().map_err(|_| {
            let location = Self::default_credentials_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| CREDENTIALS_FILE.to_string());
            ArchiveError::Configuration(format!(
                "Gmail OAuth credentials not found; place them at {} or set \
                 GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                location
            ))
            .into()
        })
    }

    /// Credentials embedded at build time through `GOOGLE_CLIENT_ID`/`GOOGLE_CLIENT_SECRET`
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Default credentials file path (~/.config/gmarchive/google-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "test-secret");
    }

    #[test]
    fn test_parse_web_credentials() {
        let json = r#"{ "web": { "client_id": "web-id", "client_secret": "web-secret" } }"#;
        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "web-id");
    }

    #[test]
    fn test_invalid_credentials_json() {
        assert!(GmailCredentials::from_json(r#"{ "other": {} }"#).is_err());
    }

    #[test]
    fn test_sync_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            query: "from:bank".to_string(),
            after: Some(Utc.with_ymd_and_hms(2018, 6, 1, 0, 0, 0).unwrap()),
            before: None,
            period: Some(PeriodKind::Month),
        };

        config.save(dir.path()).unwrap();
        let raw = std::fs::read_to_string(dir.path().join(ARCHIVE_CONFIG_FILE)).unwrap();
        assert!(raw.contains("\"period\": \"month\""));
        assert!(raw.contains("2018-06-01T00:00:00Z"));

        assert_eq!(SyncConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_missing_sync_config_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SyncConfig::load(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::Configuration(_))
        ));
    }

    #[test]
    fn test_minimal_sync_config_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{ "query": "in:inbox" }"#).unwrap();
        assert_eq!(config, SyncConfig::new("in:inbox"));
    }

    #[test]
    fn test_contains_is_half_open() {
        let mut config = SyncConfig::new("q");
        config.after = Some(Utc.with_ymd_and_hms(2020, 4, 1, 0, 0, 0).unwrap());
        config.before = Some(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap());

        assert!(config.contains(Utc.with_ymd_and_hms(2020, 4, 1, 0, 0, 0).unwrap()));
        assert!(!config.contains(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap()));
        assert!(!config.contains(Utc.with_ymd_and_hms(2020, 3, 31, 23, 0, 0).unwrap()));
    }
}
