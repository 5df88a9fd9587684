//! Remote mailbox capability
//!
//! The sync engine only needs two remote operations: a paginated search
//! listing and raw retrieval of a single message. [`Mailbox`] abstracts over
//! the Gmail API client and the in-memory mailbox used in tests.

mod ids;
mod memory;

pub use ids::MessageIdSource;
pub use memory::InMemoryMailbox;

use anyhow::Result;

use crate::models::MessageId;

/// One page of a search listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
}

/// Trait for the remote search and retrieval operations
///
/// Implementations must be shareable across the fetch worker threads.
pub trait Mailbox: Send + Sync {
    /// List one page of message ids matching a search query
    fn list(&self, query: &str, page_token: Option<&str>) -> Result<MessagePage>;

    /// Retrieve the raw RFC 822 bytes of a message
    fn get_raw(&self, id: &MessageId) -> Result<Vec<u8>>;

    /// Check whether any message matches a search query
    fn exists(&self, query: &str) -> Result<bool> {
        Ok(!self.list(query, None)?.ids.is_empty())
    }
}
