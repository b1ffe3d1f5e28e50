//! Extraction contracts and adapters.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use driftsync_types::{ExtractError, Record};

use crate::cursor::batch::BatchCursor;

/// Lazy, single-pass stream of extracted rows.
///
/// Single-pass is part of the contract: a stream must be consumed at most
/// once. Anything that needs multiple traversals goes through
/// [`FanOutCursor`](crate::FanOutCursor); the pipeline does this whenever
/// more than one loader is configured.
pub type RecordStream<T> = Box<dyn Iterator<Item = Result<T, ExtractError>> + Send>;

/// Read half of a pipeline.
///
/// `extract` must yield rows with `created_at > since` and
/// `created_at <= until`, ordered ascending by creation time (ties broken
/// by a stable secondary key in the backing query). The `until` bound
/// pins the run to a snapshot: rows inserted while the run is in flight
/// belong to the next run.
pub trait Extractor<T: Record>: Send + Sync {
    fn name(&self) -> &str;

    /// Open a lazy stream over the `(since, until]` window.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the stream cannot be opened; failures
    /// after that surface as `Err` items in the stream itself.
    fn extract(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<RecordStream<T>, ExtractError>;
}

/// Windowed page query used by [`PageExtractor`]:
/// `(since, until, offset, limit) -> rows`.
pub trait PageQuery<T>: Send + Sync {
    /// Fetch up to `limit` rows of the window starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the underlying source fails.
    fn fetch(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<T>, ExtractError>;
}

impl<T, F> PageQuery<T> for F
where
    F: Fn(DateTime<Utc>, DateTime<Utc>, usize, usize) -> Result<Vec<T>, ExtractError>
        + Send
        + Sync,
{
    fn fetch(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<T>, ExtractError> {
        self(since, until, offset, limit)
    }
}

/// Extractor over an offset-paged query, one [`BatchCursor`] per run.
pub struct PageExtractor<T, Q: PageQuery<T>> {
    name: String,
    query: Arc<Q>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, Q: PageQuery<T>> PageExtractor<T, Q> {
    pub fn new(name: impl Into<String>, query: Q) -> Self {
        Self {
            name: name.into(),
            query: Arc::new(query),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Record, Q: PageQuery<T> + 'static> Extractor<T> for PageExtractor<T, Q> {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<RecordStream<T>, ExtractError> {
        let query = Arc::clone(&self.query);
        let fetcher =
            move |offset: usize, limit: usize| query.fetch(since, until, offset, limit);
        Ok(Box::new(BatchCursor::new(fetcher, batch_size).into_stream()))
    }
}
