//! Run outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::PipelineName;

/// Outcome reported by a single loader for one pass.
///
/// `last_processed_at` is the maximum `created_at` among rows the loader
/// actually persisted; `None` when it persisted nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    pub processed_rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LoadResult {
    /// A successful result with nothing persisted yet.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failed result carrying an error message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        !self.success
    }

    /// Fold a later partial result into this one.
    ///
    /// Failure dominates; row counts always accumulate; the watermark only
    /// follows the incoming result while both sides are healthy, so a
    /// failed tail never advances past the last confirmed flush.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let failed = self.is_failed() || other.is_failed();
        let error_message = match (self.error_message, other.error_message) {
            (Some(a), Some(b)) => Some(format!("{a}; {b}")),
            (a, b) => a.or(b),
        };
        Self {
            success: !failed,
            last_processed_at: if failed {
                self.last_processed_at
            } else {
                other.last_processed_at.or(self.last_processed_at)
            },
            processed_rows: self.processed_rows + other.processed_rows,
            error_message,
        }
    }
}

/// Aggregate outcome of one pipeline pass, one per configured pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub pipeline: PipelineName,
    pub success: bool,
    /// Rows confirmed across loaders; 0 whenever the pass failed.
    pub rows_processed: u64,
    /// Minimum watermark across successful loaders; `None` when no loader
    /// persisted anything (the caller keeps its previous watermark).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RunResult {
    /// A failed pass: no rows counted, watermark untouched.
    #[must_use]
    pub fn failed(pipeline: PipelineName, message: impl Into<String>) -> Self {
        Self {
            pipeline,
            success: false,
            rows_processed: 0,
            last_processed_at: None,
            error_message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(sec: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(sec, 0).unwrap()
    }

    #[test]
    fn empty_is_successful_zero() {
        let r = LoadResult::empty();
        assert!(r.success);
        assert_eq!(r.processed_rows, 0);
        assert!(r.last_processed_at.is_none());
    }

    #[test]
    fn merge_accumulates_rows_and_advances_watermark() {
        let a = LoadResult {
            success: true,
            last_processed_at: Some(ts(10)),
            processed_rows: 100,
            error_message: None,
        };
        let b = LoadResult {
            success: true,
            last_processed_at: Some(ts(20)),
            processed_rows: 50,
            error_message: None,
        };
        let merged = a.merge(b);
        assert!(merged.success);
        assert_eq!(merged.processed_rows, 150);
        assert_eq!(merged.last_processed_at, Some(ts(20)));
    }

    #[test]
    fn merge_failure_dominates_and_keeps_confirmed_watermark() {
        let ok = LoadResult {
            success: true,
            last_processed_at: Some(ts(10)),
            processed_rows: 100,
            error_message: None,
        };
        let bad = LoadResult::failed("batch 2 rejected");
        let merged = ok.merge(bad);
        assert!(merged.is_failed());
        assert_eq!(merged.last_processed_at, Some(ts(10)));
        assert_eq!(merged.processed_rows, 100);
        assert_eq!(merged.error_message.as_deref(), Some("batch 2 rejected"));
    }

    #[test]
    fn merge_joins_error_messages() {
        let a = LoadResult::failed("first");
        let b = LoadResult::failed("second");
        let merged = a.merge(b);
        assert_eq!(merged.error_message.as_deref(), Some("first; second"));
    }

    #[test]
    fn merge_keeps_watermark_when_other_has_none() {
        let a = LoadResult {
            success: true,
            last_processed_at: Some(ts(10)),
            processed_rows: 5,
            error_message: None,
        };
        let merged = a.merge(LoadResult::empty());
        assert_eq!(merged.last_processed_at, Some(ts(10)));
    }

    #[test]
    fn failed_run_result_has_zero_rows() {
        let r = RunResult::failed(PipelineName::new("coverage"), "boom");
        assert!(!r.success);
        assert_eq!(r.rows_processed, 0);
        assert!(r.last_processed_at.is_none());
    }
}
