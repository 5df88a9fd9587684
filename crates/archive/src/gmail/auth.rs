//! Gmail OAuth2 authentication
//!
//! Implements the OAuth2 authorization code flow for installed apps. The
//! browser redirects to a short-lived local HTTP listener that receives the
//! authorization code. Tokens are cached on disk and refreshed before expiry.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Mutex;

/// Seconds before expiry at which a token is considered stale
const EXPIRY_MARGIN_SECS: i64 = 300;

/// OAuth2 configuration and token management for Gmail
///
/// Safe to share between fetch workers: token acquisition is serialized so
/// concurrent callers never start more than one refresh or browser flow.
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
    current: Mutex<Option<StoredToken>>,
}

/// Stored token data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at > chrono::Utc::now().timestamp() + EXPIRY_MARGIN_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Archiving only ever reads mail
    const GMAIL_READONLY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.readonly";

    /// Port range to try for local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Create a new GmailAuth instance with tokens cached in the config directory
    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        Ok(Self::with_token_path(
            client_id,
            client_secret,
            Self::default_token_path()?,
        ))
    }

    /// Create a GmailAuth instance caching tokens at a specific path
    pub fn with_token_path(client_id: String, client_secret: String, token_path: PathBuf) -> Self {
        Self {
            client_id,
            client_secret,
            token_path,
            current: Mutex::new(None),
        }
    }

    /// Default token storage path (~/.config/gmarchive/gmail-tokens.json)
    pub fn default_token_path() -> Result<PathBuf> {
        config::config_path("gmail-tokens.json").context("Could not determine config directory")
    }

    /// Get a valid access token, refreshing or re-authenticating as needed
    pub fn get_access_token(&self) -> Result<String> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());

        if current.is_none() {
            *current = self.load_token().ok();
        }
        if let Some(token) = current.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        if let Some(refresh_token) = current.as_ref().and_then(|t| t.refresh_token.clone()) {
            match self.refresh_access_token(&refresh_token) {
                Ok(response) => {
                    let token = self.save_token_response(&response)?;
                    let access_token = token.access_token.clone();
                    *current = Some(token);
                    return Ok(access_token);
                }
                Err(e) => warn!("Token refresh failed, re-authenticating: {:#}", e),
            }
        }

        let response = self.authorization_code_auth()?;
        let token = self.save_token_response(&response)?;
        let access_token = token.access_token.clone();
        *current = Some(token);
        Ok(access_token)
    }

    /// Perform authorization code flow authentication
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_READONLY_SCOPE),
        );

        info!("Gmail authentication required, opening browser");
        info!("If the browser doesn't open, visit: {}", auth_url);
        if let Err(e) = open::that(&auth_url) {
            warn!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        let code = self.wait_for_callback(listener)?;

        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        info!("Authentication successful");
        Ok(token)
    }

    /// Start a local TCP server on an available port
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Wait for the OAuth redirect and extract the authorization code
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut request_line = String::new();
        BufReader::new(&stream)
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        // GET /?code=AUTH_CODE&scope=... HTTP/1.1
        let code = query_param(&request_line, "code");
        let error = query_param(&request_line, "error");

        let (status, body) = if code.is_some() {
            ("200 OK", "Authentication successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authentication failed. Please try again.")
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        if let Some(err) = error {
            anyhow::bail!("OAuth error: {}", err);
        }
        code.context("No authorization code received")
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token on refresh; keep the one we have
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_token_response(&self, token: &TokenResponse) -> Result<StoredToken> {
        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };
        config::save_json_file(&self.token_path, &stored)?;
        Ok(stored)
    }

    /// Check if a usable token is cached, refreshing it if necessary
    pub fn is_authenticated(&self) -> bool {
        match self.load_token() {
            Ok(token) if token.is_fresh() => true,
            Ok(token) => token
                .refresh_token
                .is_some_and(|r| self.refresh_access_token(&r).is_ok()),
            Err(_) => false,
        }
    }

    /// Clear stored tokens (logout)
    pub fn logout(&self) -> Result<()> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }
}

/// Value of a query parameter in an HTTP request line
fn query_param(request_line: &str, name: &str) -> Option<String> {
    let path = request_line.split_whitespace().nth(1)?;
    let (_, query) = path.split_once('?')?;
    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        (key == name).then(|| {
            urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        let line = "GET /?code=4%2F0Abc&scope=https%3A%2F%2Fmail HTTP/1.1\r\n";
        assert_eq!(query_param(line, "code").as_deref(), Some("4/0Abc"));
        assert_eq!(query_param(line, "error"), None);
        assert_eq!(
            query_param("GET /?error=access_denied HTTP/1.1", "error").as_deref(),
            Some("access_denied")
        );
        assert_eq!(query_param("GET / HTTP/1.1", "code"), None);
    }

    #[test]
    fn test_logout_removes_cached_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let auth = GmailAuth::with_token_path("id".into(), "secret".into(), path.clone());

        let stored = auth
            .save_token_response(&TokenResponse {
                access_token: "access".into(),
                refresh_token: Some("refresh".into()),
                expires_in: Some(3600),
            })
            .unwrap();
        assert!(stored.is_fresh());
        assert!(auth.is_authenticated());

        auth.logout().unwrap();
        assert!(!path.exists());
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn test_cached_fresh_token_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let auth =
            GmailAuth::with_token_path("id".into(), "secret".into(), dir.path().join("t.json"));
        auth.save_token_response(&TokenResponse {
            access_token: "cached-access".into(),
            refresh_token: None,
            expires_in: Some(3600),
        })
        .unwrap();

        assert_eq!(auth.get_access_token().unwrap(), "cached-access");
    }
}
