//! Engine-local error types.

use driftsync_types::ExtractError;

/// Errors produced by cursor iteration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CursorError {
    /// `next()` was called on an exhausted cursor. Always a caller bug,
    /// never retried.
    #[error("cursor exhausted")]
    Exhausted,

    /// The underlying page fetch failed.
    #[error("page fetch failed: {0}")]
    Fetch(#[source] ExtractError),
}
