//! `SQLite`-backed implementation of [`MetadataStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use driftsync_types::{PipelineMetadata, PipelineName, RunStatus};
use rusqlite::Connection;

use crate::error::{self, StateError};

/// Idempotent DDL for the metadata table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS pipeline_metadata (
    pipeline TEXT PRIMARY KEY,
    last_processed_at TEXT NOT NULL,
    last_run_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    rows_processed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// `SQLite`-backed metadata storage.
///
/// Create with [`SqliteMetadataStore::open`] for file-backed persistence
/// or [`SqliteMetadataStore::in_memory`] for tests.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open or create a `SQLite` metadata database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Parse a stored RFC-3339 timestamp.
    fn parse_timestamp(pipeline: &str, raw: &str) -> error::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StateError::Corrupt {
                pipeline: pipeline.to_string(),
                reason: format!("bad timestamp '{raw}': {e}"),
            })
    }
}

impl crate::store::MetadataStore for SqliteMetadataStore {
    fn get_metadata(&self, pipeline: &PipelineName) -> error::Result<Option<PipelineMetadata>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT last_processed_at, last_run_at, duration_ms, status, \
             rows_processed, error_message \
             FROM pipeline_metadata WHERE pipeline = ?1",
        )?;

        type Row = (String, String, i64, String, i64, Option<String>);
        let result = stmt.query_row(rusqlite::params![pipeline.as_str()], |row| {
            Ok::<Row, rusqlite::Error>((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        });

        match result {
            Ok((processed_raw, run_raw, duration_ms, status_raw, rows, error_message)) => {
                let status =
                    RunStatus::parse(&status_raw).ok_or_else(|| StateError::Corrupt {
                        pipeline: pipeline.as_str().to_string(),
                        reason: format!("bad status '{status_raw}'"),
                    })?;
                Ok(Some(PipelineMetadata {
                    pipeline: pipeline.clone(),
                    last_processed_at: Self::parse_timestamp(pipeline.as_str(), &processed_raw)?,
                    last_run_at: Self::parse_timestamp(pipeline.as_str(), &run_raw)?,
                    duration_ms: u64::try_from(duration_ms).unwrap_or(0),
                    status,
                    rows_processed: u64::try_from(rows).unwrap_or(0),
                    error_message,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::Sqlite(e)),
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn save_metadata(&self, metadata: &PipelineMetadata) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO pipeline_metadata \
             (pipeline, last_processed_at, last_run_at, duration_ms, status, \
              rows_processed, error_message, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now')) \
             ON CONFLICT(pipeline) \
             DO UPDATE SET last_processed_at = ?2, last_run_at = ?3, \
              duration_ms = ?4, status = ?5, rows_processed = ?6, \
              error_message = ?7, updated_at = datetime('now')",
            rusqlite::params![
                metadata.pipeline.as_str(),
                metadata.last_processed_at.to_rfc3339(),
                metadata.last_run_at.to_rfc3339(),
                metadata.duration_ms as i64,
                metadata.status.as_str(),
                metadata.rows_processed as i64,
                metadata.error_message,
            ],
        )?;
        Ok(())
    }

    fn delete_metadata(&self, pipeline: &PipelineName) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM pipeline_metadata WHERE pipeline = ?1",
            rusqlite::params![pipeline.as_str()],
        )?;
        if deleted > 0 {
            tracing::debug!(pipeline = pipeline.as_str(), "Metadata row deleted");
        }
        Ok(())
    }
}
