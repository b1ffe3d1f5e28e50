//! Metadata store error types.

/// Errors produced by [`MetadataStore`](crate::MetadataStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("metadata store lock poisoned")]
    LockPoisoned,

    /// A stored row failed to parse back into the model.
    #[error("corrupt metadata row for pipeline '{pipeline}': {reason}")]
    Corrupt { pipeline: String, reason: String },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_poisoned_displays() {
        assert_eq!(
            StateError::LockPoisoned.to_string(),
            "metadata store lock poisoned"
        );
    }

    #[test]
    fn io_error_wraps() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = StateError::Io(inner);
        assert!(err.to_string().contains("i/o"));
    }

    #[test]
    fn corrupt_row_names_pipeline() {
        let err = StateError::Corrupt {
            pipeline: "coverage".into(),
            reason: "bad status 'runnning'".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("coverage"), "got: {msg}");
        assert!(msg.contains("bad status"), "got: {msg}");
    }
}
