//! Shared error taxonomy for extraction and loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure raised by an extractor or by a page fetch it delegates to.
///
/// Cloneable on purpose: an extracted stream may be fanned out to several
/// readers, and each of them must observe the same terminal error.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("extraction failed: {message}")]
pub struct ExtractError {
    pub message: String,
}

impl ExtractError {
    /// Build from anything displayable (source errors, format strings).
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl From<anyhow::Error> for ExtractError {
    fn from(e: anyhow::Error) -> Self {
        Self::new(e)
    }
}

/// Failure raised by a loader while draining its input.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The extraction side failed mid-stream.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Input violated the ascending `created_at` ordering contract.
    #[error("rows not in ascending created_at order: {current} after {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// The sink rejected a batch or failed to persist it.
    #[error("load failed: {0}")]
    Sink(String),
}

impl LoadError {
    /// Wrap a sink-side failure, keeping its rendered message.
    pub fn sink(e: impl std::fmt::Display) -> Self {
        Self::Sink(e.to_string())
    }
}
