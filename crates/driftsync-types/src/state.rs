//! Persisted pipeline state model.
//!
//! One [`PipelineMetadata`] row exists per pipeline, keyed by
//! [`PipelineName`]. The row is written exclusively by the orchestrator,
//! once per run; the watermark field advances only when the run succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque pipeline identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineName(String);

impl PipelineName {
    /// Create a new pipeline name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for PipelineName {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Terminal status of a pipeline run.
///
/// An in-flight run is never persisted, so there is no running variant:
/// the orchestrator holds the run and writes only its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Parse the storage wire form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Metadata row
// ---------------------------------------------------------------------------

/// Snapshot of a pipeline's persisted incremental progress.
///
/// Invariant: `last_processed_at` is monotonically non-decreasing and is
/// updated iff a run succeeds. A failed run updates every other field and
/// leaves the watermark where the last successful run put it, so the next
/// run re-extracts the same unprocessed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub pipeline: PipelineName,
    /// Watermark: all rows with `created_at <= last_processed_at` are
    /// confirmed processed.
    pub last_processed_at: DateTime<Utc>,
    /// Timestamp of the most recent attempt, successful or not.
    pub last_run_at: DateTime<Utc>,
    /// Wall-clock duration of the most recent attempt, in milliseconds.
    pub duration_ms: u64,
    pub status: RunStatus,
    /// Rows the loaders confirmed in the most recent attempt; 0 on failure.
    pub rows_processed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PipelineMetadata {
    /// State of a pipeline that has never run: epoch watermark, `Success`.
    #[must_use]
    pub fn initial(pipeline: PipelineName) -> Self {
        Self {
            pipeline,
            last_processed_at: DateTime::UNIX_EPOCH,
            last_run_at: DateTime::UNIX_EPOCH,
            duration_ms: 0,
            status: RunStatus::Success,
            rows_processed: 0,
            error_message: None,
        }
    }
}
