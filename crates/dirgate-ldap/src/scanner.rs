//! Lazy paged result streams
//!
//! A [`ResultStream`] pulls one page per [`ResultStream::next`] call from a
//! bound retriever and latches the outcome. The retriever signals its final
//! page in-band; that signal terminates the stream silently instead of
//! surfacing as an error.

use async_trait::async_trait;

use crate::error::LdapClientError;

/// Outcome of one retriever call.
#[derive(Debug)]
pub enum Fetched<T> {
    /// A page with more to follow.
    More(Vec<T>),
    /// The final page; the stream terminates after delivering it.
    Last(Vec<T>),
}

/// Produces pages for a [`ResultStream`], one per call, in server order.
#[async_trait]
pub trait PageRetriever<T>: Send {
    async fn fetch(&mut self) -> Result<Fetched<T>, LdapClientError>;
}

/// Lazy iterator over paged directory results.
///
/// Constructed per query and consumed by one reader. Pages are never
/// reordered or deduplicated across calls.
pub struct ResultStream<T> {
    retriever: Box<dyn PageRetriever<T>>,
    page: Option<Vec<T>>,
    last_err: Option<LdapClientError>,
    done: bool,
}

impl<T> ResultStream<T> {
    /// Build a stream over a custom retriever.
    pub fn from_retriever(retriever: Box<dyn PageRetriever<T>>) -> Self {
        Self {
            retriever,
            page: None,
            last_err: None,
            done: false,
        }
    }

    /// Fetch the next page. Returns `true` iff a page was produced and no
    /// error is latched. The first `false` is terminal.
    pub async fn next(&mut self) -> bool {
        if self.done {
            return false;
        }
        match self.retriever.fetch().await {
            Ok(Fetched::More(items)) => {
                self.page = Some(items);
                true
            }
            Ok(Fetched::Last(items)) => {
                self.done = true;
                self.page = Some(items);
                true
            }
            Err(e) => {
                self.done = true;
                self.page = None;
                self.last_err = Some(e);
                false
            }
        }
    }

    /// The latched error, if any. End of data is not an error.
    pub fn last_err(&self) -> Option<&LdapClientError> {
        self.last_err.as_ref()
    }

    /// Consume the latched error, leaving the stream terminal.
    pub fn take_last_err(&mut self) -> Option<LdapClientError> {
        self.last_err.take()
    }

    /// Hand the page from the most recent successful [`Self::next`] to the
    /// setter. Safe to call repeatedly; the latched page does not change
    /// once the stream is terminal.
    pub fn scan<F>(&self, setter: F)
    where
        F: FnOnce(&[T]),
    {
        if let Some(page) = &self.page {
            setter(page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Retriever replaying a scripted sequence of fetch outcomes.
    struct Scripted {
        outcomes: VecDeque<Result<Fetched<u32>, LdapClientError>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Fetched<u32>, LdapClientError>>) -> Box<Self> {
            Box::new(Self {
                outcomes: outcomes.into(),
            })
        }
    }

    #[async_trait]
    impl PageRetriever<u32> for Scripted {
        async fn fetch(&mut self) -> Result<Fetched<u32>, LdapClientError> {
            self.outcomes
                .pop_front()
                .unwrap_or_else(|| panic!("fetch past end of script"))
        }
    }

    fn collect(stream: &ResultStream<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        stream.scan(|page| out.extend_from_slice(page));
        out
    }

    #[tokio::test]
    async fn test_stream_walks_pages_then_terminates() {
        let mut stream = ResultStream::from_retriever(Scripted::new(vec![
            Ok(Fetched::More(vec![1])),
            Ok(Fetched::More(vec![2])),
            Ok(Fetched::Last(vec![3])),
        ]));

        assert!(stream.next().await);
        assert_eq!(collect(&stream), vec![1]);
        assert!(stream.next().await);
        assert_eq!(collect(&stream), vec![2]);
        assert!(stream.next().await);
        assert_eq!(collect(&stream), vec![3]);

        assert!(!stream.next().await);
        assert!(stream.last_err().is_none());
    }

    #[tokio::test]
    async fn test_scan_after_end_repeats_last_page() {
        let mut stream =
            ResultStream::from_retriever(Scripted::new(vec![Ok(Fetched::Last(vec![7, 8]))]));

        assert!(stream.next().await);
        assert!(!stream.next().await);
        // The final page stays latched after the stream terminates.
        assert_eq!(collect(&stream), vec![7, 8]);
        assert_eq!(collect(&stream), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_error_latches_and_terminates() {
        let mut stream = ResultStream::from_retriever(Scripted::new(vec![
            Ok(Fetched::More(vec![1])),
            Err(LdapClientError::network("connection reset")),
        ]));

        assert!(stream.next().await);
        assert!(!stream.next().await);
        assert!(stream.last_err().is_some());
        // Terminal: the retriever is not consulted again.
        assert!(!stream.next().await);
        assert!(collect(&stream).is_empty());
    }

    #[tokio::test]
    async fn test_empty_final_page_still_yields_once() {
        let mut stream =
            ResultStream::from_retriever(Scripted::new(vec![Ok(Fetched::Last(vec![]))]));

        assert!(stream.next().await);
        assert!(collect(&stream).is_empty());
        assert!(!stream.next().await);
        assert!(stream.last_err().is_none());
    }
}
