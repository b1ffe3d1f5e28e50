//! Loading contracts and the batching loader adapter.

use chrono::{DateTime, Utc};
use driftsync_types::{LoadError, LoadResult, Record};

use crate::extract::RecordStream;

/// Write half of a pipeline.
///
/// `load` consumes its stream exactly once (single-pass contract) and
/// reports what was actually persisted: `processed_rows` and, as the
/// watermark, the maximum `created_at` among persisted rows. A loader
/// must either succeed fully or report `success = false`.
pub trait Loader<T: Record>: Send + Sync {
    fn name(&self) -> &str;

    /// Drain the stream into the backing store.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] on unrecoverable input or sink failure; the
    /// pipeline converts it into a failed [`LoadResult`].
    fn load(&self, rows: RecordStream<T>, batch_size: usize) -> Result<LoadResult, LoadError>;

    /// Delete everything this loader has ever persisted (rerun support).
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] on sink failure.
    fn delete_all(&self) -> Result<(), LoadError> {
        Ok(())
    }
}

/// Rows confirmed by one batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub rows_loaded: u64,
}

/// Batch-write seam implemented by concrete destinations.
pub trait BatchSink<T: Record>: Send + Sync {
    fn name(&self) -> &str;

    /// Rows the sink cannot store are skipped, not failed.
    fn is_processable(&self, _row: &T) -> bool {
        true
    }

    /// Persist one batch. `batch_no` starts at 1 within a pass.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the write fails; the pass stops and the
    /// watermark stays at the last fully-committed flush.
    fn load_batch(&self, batch: &[T], batch_no: u32) -> Result<BatchOutcome, LoadError>;

    /// Delete everything previously persisted (rerun support).
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] on sink failure.
    fn delete_all(&self) -> Result<(), LoadError> {
        Ok(())
    }
}

/// [`Loader`] adapter that buffers rows into batches for a [`BatchSink`].
///
/// Input must arrive in ascending `created_at` order. A flush is deferred
/// until the timestamp changes, so one `created_at` group is never split
/// across two batches and the reported watermark always covers fully
/// committed timestamps only.
pub struct BatchLoader<S> {
    sink: S,
}

impl<S> BatchLoader<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S> BatchLoader<S> {
    fn flush<T: Record>(
        &self,
        buffer: &mut Vec<T>,
        batch_no: &mut u32,
        watermark: DateTime<Utc>,
    ) -> LoadResult
    where
        S: BatchSink<T>,
    {
        *batch_no += 1;
        let rows = std::mem::take(buffer);
        match self.sink.load_batch(&rows, *batch_no) {
            Ok(outcome) => {
                tracing::debug!(
                    loader = self.sink.name(),
                    batch = *batch_no,
                    rows = outcome.rows_loaded,
                    "Batch committed"
                );
                LoadResult {
                    success: true,
                    last_processed_at: Some(watermark),
                    processed_rows: outcome.rows_loaded,
                    error_message: None,
                }
            }
            Err(e) => {
                tracing::error!(
                    loader = self.sink.name(),
                    batch = *batch_no,
                    "Batch failed: {e}"
                );
                LoadResult::failed(format!("batch {}: {e}", *batch_no))
            }
        }
    }
}

impl<T: Record, S: BatchSink<T>> Loader<T> for BatchLoader<S> {
    fn name(&self) -> &str {
        self.sink.name()
    }

    fn load(&self, rows: RecordStream<T>, batch_size: usize) -> Result<LoadResult, LoadError> {
        let batch_size = batch_size.max(1);
        let mut result = LoadResult::empty();
        let mut buffer: Vec<T> = Vec::with_capacity(batch_size);
        let mut batch_no = 0u32;
        let mut previous: Option<DateTime<Utc>> = None;
        let mut skipped = 0u64;

        for item in rows {
            let row = match item {
                Ok(row) => row,
                Err(e) => {
                    result = result.merge(LoadResult::failed(e.to_string()));
                    break;
                }
            };
            let current = row.created_at();
            if let Some(prev) = previous {
                if current < prev {
                    let err = LoadError::OutOfOrder {
                        previous: prev,
                        current,
                    };
                    result = result.merge(LoadResult::failed(err.to_string()));
                    break;
                }
                // Flush only at a timestamp boundary: a created_at group is
                // never split across batches.
                if current != prev && buffer.len() >= batch_size {
                    result = result.merge(self.flush(&mut buffer, &mut batch_no, prev));
                    if result.is_failed() {
                        break;
                    }
                }
            }
            previous = Some(current);
            if !self.sink.is_processable(&row) {
                skipped += 1;
                continue;
            }
            buffer.push(row);
        }

        if !result.is_failed() && !buffer.is_empty() {
            if let Some(prev) = previous {
                result = result.merge(self.flush(&mut buffer, &mut batch_no, prev));
            }
        }

        tracing::debug!(
            loader = self.sink.name(),
            rows = result.processed_rows,
            skipped,
            batches = batch_no,
            failed = result.is_failed(),
            "Load pass finished"
        );
        Ok(result)
    }

    fn delete_all(&self) -> Result<(), LoadError> {
        self.sink.delete_all()
    }
}
