//! Gmail API HTTP client
//!
//! Provides the search listing and raw retrieval calls the archiver needs.
//! Uses synchronous HTTP (ureq) so calls can run on plain worker threads.

use anyhow::{Context, Result};
use base64::prelude::*;
use url::Url;

use super::GmailAuth;
use super::api::{ListMessagesResponse, RawMessage};
use crate::error::ArchiveError;
use crate::models::MessageId;
use crate::source::{Mailbox, MessagePage};

/// Gmail API client
pub struct GmailClient {
    auth: GmailAuth,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Largest page the listing endpoint accepts
    const MAX_PAGE_SIZE: usize = 500;

    pub fn new(auth: GmailAuth) -> Self {
        Self { auth }
    }

    /// List message IDs matching a search query
    ///
    /// # Arguments
    /// * `query` - Gmail search query (`q` parameter)
    /// * `max_results` - Maximum number of messages to return per page (1-500)
    /// * `page_token` - Optional page token for pagination
    pub fn list_messages(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let mut params = vec![
            ("q", query.to_string()),
            (
                "maxResults",
                max_results.clamp(1, Self::MAX_PAGE_SIZE).to_string(),
            ),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let url = Url::parse_with_params(&format!("{}/users/me/messages", Self::BASE_URL), &params)
            .context("Failed to build list messages URL")?;

        self.get_json(url.as_str(), "list")
    }

    /// Get a message in raw RFC 822 form
    pub fn get_raw_message(&self, id: &MessageId) -> Result<RawMessage> {
        let url = format!(
            "{}/users/me/messages/{}?format=raw",
            Self::BASE_URL,
            urlencoding::encode(id.as_str())
        );
        self.get_json(&url, "get")
    }

    /// Check if the client is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Trigger authentication flow
    pub fn authenticate(&self) -> Result<()> {
        self.auth.get_access_token()?;
        Ok(())
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        operation: &'static str,
    ) -> Result<T> {
        let access_token = self.auth.get_access_token()?;

        let mut response = ureq::get(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| ArchiveError::remote(operation, e))?;

        let parsed = response
            .body_mut()
            .read_json()
            .map_err(|e| ArchiveError::remote(operation, format!("invalid response: {}", e)))?;
        Ok(parsed)
    }
}

impl Mailbox for GmailClient {
    fn list(&self, query: &str, page_token: Option<&str>) -> Result<MessagePage> {
        let response = self.list_messages(query, Self::MAX_PAGE_SIZE, page_token)?;
        Ok(MessagePage {
            ids: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    fn get_raw(&self, id: &MessageId) -> Result<Vec<u8>> {
        let message = self.get_raw_message(id)?;
        decode_raw(&message.raw).ok_or_else(|| {
            ArchiveError::parse(id.as_str(), "raw body is not valid base64").into()
        })
    }

    fn exists(&self, query: &str) -> Result<bool> {
        let response = self.list_messages(query, 1, None)?;
        Ok(response.messages.is_some_and(|m| !m.is_empty()))
    }
}

/// Decode base64-encoded message data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_raw(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders.iter().find_map(|decoder| decoder.decode(data).ok())
}
