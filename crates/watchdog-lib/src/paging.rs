//! Continuation-token driven iteration over remote listings
//!
//! Offers, collections and partition key ranges are all listed the same
//! way: ask for a page, get items plus an opaque continuation, repeat until
//! the continuation comes back empty. [`PagedResourceIterator`] does that
//! once for any fetch closure.

use std::collections::VecDeque;
use std::future::Future;

/// Page size hint sent with every listing request
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One page of a remote listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` or empty when the listing is done
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, continuation: Option<String>) -> Self {
        Self {
            items,
            continuation,
        }
    }

    /// A page with nothing after it
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

/// Lazy sequence of items over a paged listing
///
/// The fetch closure receives the continuation token (absent for the first
/// page) and the page size hint. Pages are only requested when the buffered
/// items run out.
pub struct PagedResourceIterator<T, F> {
    fetch: F,
    page_size: usize,
    buffer: VecDeque<T>,
    continuation: Option<String>,
    exhausted: bool,
    pages_fetched: usize,
}

impl<T, F, Fut, E> PagedResourceIterator<T, F>
where
    F: FnMut(Option<String>, usize) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    pub fn new(fetch: F) -> Self {
        Self::with_page_size(fetch, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(fetch: F, page_size: usize) -> Self {
        Self {
            fetch,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            continuation: None,
            exhausted: false,
            pages_fetched: 0,
        }
    }

    /// Next item, fetching further pages as needed
    pub async fn next(&mut self) -> Result<Option<T>, E> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }

            let page = (self.fetch)(self.continuation.take(), self.page_size).await?;
            self.pages_fetched += 1;
            self.buffer.extend(page.items);

            match page.continuation {
                Some(token) if !token.is_empty() => self.continuation = Some(token),
                _ => self.exhausted = true,
            }
        }
    }

    /// Drop all progress so the next call starts from the first page
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.continuation = None;
        self.exhausted = false;
        self.pages_fetched = 0;
    }

    /// Number of fetch calls issued since creation or the last restart
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Drain the whole listing into a vector
    pub async fn try_collect(&mut self) -> Result<Vec<T>, E> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Count the items of the listing without keeping them
    pub async fn count(&mut self) -> Result<usize, E> {
        let mut count = 0;
        while self.next().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}
