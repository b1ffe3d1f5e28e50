//! Row contract for extracted data.

use chrono::{DateTime, Utc};

/// A row flowing through a pipeline.
///
/// Rows must expose their creation time: the engine orders, windows, and
/// watermarks exclusively on it. `Clone` is required because a fan-out
/// buffer serves the same row to every reader.
pub trait Record: Clone + Send + 'static {
    /// Creation timestamp used for incremental windowing.
    fn created_at(&self) -> DateTime<Utc>;
}
