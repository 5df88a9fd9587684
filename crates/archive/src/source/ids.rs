//! Lazy, paginated stream of message ids

use std::collections::VecDeque;

use anyhow::Result;
use log::debug;

use super::Mailbox;
use crate::models::MessageId;

/// Streams the ids matching a query, one listing page at a time
///
/// Pages are requested strictly in sequence: the next request is only issued
/// once the buffered ids of the previous page are consumed and its
/// continuation token is known. Each page passes through `filter` before its
/// ids are yielded. A listing error is yielded once and ends the stream.
///
/// The stream is not restartable; building a second one reissues the
/// listing requests.
pub struct MessageIdSource<'a, F> {
    mailbox: &'a dyn Mailbox,
    query: String,
    filter: F,
    buffer: VecDeque<MessageId>,
    page_token: Option<String>,
    pages: usize,
    finished: bool,
}

impl<'a, F> MessageIdSource<'a, F>
where
    F: FnMut(&MessageId) -> bool,
{
    pub fn new(mailbox: &'a dyn Mailbox, query: impl Into<String>, filter: F) -> Self {
        Self {
            mailbox,
            query: query.into(),
            filter,
            buffer: VecDeque::new(),
            page_token: None,
            pages: 0,
            finished: false,
        }
    }

    /// Number of listing pages requested so far
    pub fn pages(&self) -> usize {
        self.pages
    }

    fn fetch_page(&mut self) -> Result<()> {
        let page = self.mailbox.list(&self.query, self.page_token.as_deref())?;
        self.pages += 1;

        let listed = page.ids.len();
        let filter = &mut self.filter;
        self.buffer
            .extend(page.ids.into_iter().filter(|id| filter(id)));
        debug!(
            "Listing page {} for '{}': {} ids, {} new",
            self.pages,
            self.query,
            listed,
            self.buffer.len()
        );

        match page.next_page_token {
            Some(token) => self.page_token = Some(token),
            None => self.finished = true,
        }
        Ok(())
    }
}

impl<F> Iterator for MessageIdSource<'_, F>
where
    F: FnMut(&MessageId) -> bool,
{
    type Item = Result<MessageId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Some(Ok(id));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MessagePage;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Serves fixed pages and records the tokens it was asked for
    struct PagedMailbox {
        pages: Vec<Vec<&'static str>>,
        requested: Mutex<Vec<Option<String>>>,
        fail_on_page: Option<usize>,
    }

    impl PagedMailbox {
        fn new(pages: Vec<Vec<&'static str>>) -> Self {
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
                fail_on_page: None,
            }
        }
    }

    impl Mailbox for PagedMailbox {
        fn list(&self, _query: &str, page_token: Option<&str>) -> Result<MessagePage> {
            self.requested
                .lock()
                .unwrap()
                .push(page_token.map(str::to_string));
            let index: usize = page_token.map_or(0, |t| t.parse().unwrap());
            if self.fail_on_page == Some(index) {
                anyhow::bail!("listing unavailable");
            }
            let next = index + 1;
            Ok(MessagePage {
                ids: self.pages[index].iter().map(|s| MessageId::new(*s)).collect(),
                next_page_token: (next < self.pages.len()).then(|| next.to_string()),
            })
        }

        fn get_raw(&self, _id: &MessageId) -> Result<Vec<u8>> {
            unreachable!("listing tests never fetch")
        }
    }

    #[test]
    fn test_streams_all_pages_in_order() {
        let mailbox = PagedMailbox::new(vec![vec!["a", "b"], vec!["c"], vec!["d", "e"]]);
        let ids: Vec<String> = MessageIdSource::new(&mailbox, "q", |_: &MessageId| true)
            .map(|id| id.unwrap().0)
            .collect();

        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(
            *mailbox.requested.lock().unwrap(),
            vec![None, Some("1".to_string()), Some("2".to_string())]
        );
    }

    #[test]
    fn test_filter_drops_known_ids() {
        let mailbox = PagedMailbox::new(vec![vec!["a", "b"], vec!["c", "d"]]);
        let known: HashSet<MessageId> = ["b", "c"].into_iter().map(MessageId::from).collect();
        let ids: Vec<String> = MessageIdSource::new(&mailbox, "q", |id: &MessageId| {
            !known.contains(id)
        })
        .map(|id| id.unwrap().0)
        .collect();

        assert_eq!(ids, vec!["a", "d"]);
    }

    #[test]
    fn test_empty_pages_are_skipped() {
        let mailbox = PagedMailbox::new(vec![vec![], vec![], vec!["z"]]);
        let ids: Vec<_> = MessageIdSource::new(&mailbox, "q", |_: &MessageId| true).collect();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_is_lazy() {
        let mailbox = PagedMailbox::new(vec![vec!["a"], vec!["b"]]);
        let mut source = MessageIdSource::new(&mailbox, "q", |_: &MessageId| true);

        assert_eq!(source.pages(), 0);
        source.next().unwrap().unwrap();
        assert_eq!(source.pages(), 1);
        assert_eq!(mailbox.requested.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_page_error_ends_stream() {
        let mut mailbox = PagedMailbox::new(vec![vec!["a"], vec!["b"], vec!["c"]]);
        mailbox.fail_on_page = Some(1);
        let results: Vec<_> = MessageIdSource::new(&mailbox, "q", |_: &MessageId| true).collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
