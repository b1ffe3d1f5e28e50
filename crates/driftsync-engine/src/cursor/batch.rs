//! Resumable forward iteration over an offset-paged data source.

use std::collections::VecDeque;

use driftsync_types::ExtractError;

use crate::error::CursorError;

/// Page-fetch seam supplied by the concrete source (e.g. a paginated query).
pub trait PageFetcher<T> {
    /// Fetch up to `batch_size` items starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the underlying source fails.
    fn fetch_page(&mut self, offset: usize, batch_size: usize) -> Result<Vec<T>, ExtractError>;
}

impl<T, F> PageFetcher<T> for F
where
    F: FnMut(usize, usize) -> Result<Vec<T>, ExtractError>,
{
    fn fetch_page(&mut self, offset: usize, batch_size: usize) -> Result<Vec<T>, ExtractError> {
        self(offset, batch_size)
    }
}

/// Forward-only cursor that pulls fixed-size pages on demand.
///
/// Exhaustion is declared the moment any page, pre-seeded or fetched,
/// comes back shorter than `batch_size` (including empty). A pre-seeded
/// page shorter than `batch_size` is therefore treated as the final page;
/// callers seeding a short page must guarantee it really is the tail.
pub struct BatchCursor<T, F: PageFetcher<T>> {
    fetcher: F,
    batch_size: usize,
    page: VecDeque<T>,
    offset: usize,
    /// The most recent page was short, so no further fetch will happen.
    final_page: bool,
}

impl<T, F: PageFetcher<T>> BatchCursor<T, F> {
    /// Cursor with no pre-seeded data; the first page is fetched lazily.
    pub fn new(fetcher: F, batch_size: usize) -> Self {
        Self::with_initial(fetcher, batch_size, Vec::new())
    }

    /// Cursor seeded with an already-fetched first page.
    ///
    /// The seed is consumed before any fetch and the running offset starts
    /// at its length. An empty seed is equivalent to no seed at all.
    pub fn with_initial(fetcher: F, batch_size: usize, initial: Vec<T>) -> Self {
        let final_page = !initial.is_empty() && initial.len() < batch_size;
        Self {
            fetcher,
            batch_size,
            offset: initial.len(),
            page: VecDeque::from(initial),
            final_page,
        }
    }

    /// Whether another item is available, fetching the next page if the
    /// current one is drained. Idempotent: repeated calls without an
    /// intervening [`next`](Self::next) never fetch twice.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Fetch`] when the page fetch fails.
    pub fn has_next(&mut self) -> Result<bool, CursorError> {
        if !self.page.is_empty() {
            return Ok(true);
        }
        if self.final_page {
            return Ok(false);
        }
        let items = self
            .fetcher
            .fetch_page(self.offset, self.batch_size)
            .map_err(CursorError::Fetch)?;
        self.offset += items.len();
        if items.len() < self.batch_size {
            self.final_page = true;
        }
        self.page = VecDeque::from(items);
        Ok(!self.page.is_empty())
    }

    /// Take the next item.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError::Exhausted`] when no items remain, or
    /// [`CursorError::Fetch`] when the page fetch fails.
    pub fn next(&mut self) -> Result<T, CursorError> {
        if !self.has_next()? {
            return Err(CursorError::Exhausted);
        }
        // has_next() == true guarantees a buffered item.
        self.page.pop_front().ok_or(CursorError::Exhausted)
    }

    /// Adapt into the engine's fallible row stream form: exhaustion becomes
    /// the end of the iterator, fetch failures become a terminal `Err` item.
    pub fn into_stream(self) -> BatchStream<T, F> {
        BatchStream {
            cursor: self,
            failed: false,
        }
    }
}

/// Iterator adapter over [`BatchCursor`], yielding `Result` items.
pub struct BatchStream<T, F: PageFetcher<T>> {
    cursor: BatchCursor<T, F>,
    failed: bool,
}

impl<T, F: PageFetcher<T>> Iterator for BatchStream<T, F> {
    type Item = Result<T, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.next() {
            Ok(item) => Some(Ok(item)),
            Err(CursorError::Exhausted) => None,
            Err(CursorError::Fetch(e)) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
