//! Shared model types for the driftsync incremental ETL engine.
//!
//! This crate is logic-free: pipeline identity, persisted metadata, run
//! results, the row contract, and the shared error taxonomy. Both the state
//! and engine crates depend on it without circular dependencies.

pub mod error;
pub mod record;
pub mod result;
pub mod state;

pub use error::{ExtractError, LoadError};
pub use record::Record;
pub use result::{LoadResult, RunResult};
pub use state::{PipelineMetadata, PipelineName, RunStatus};
