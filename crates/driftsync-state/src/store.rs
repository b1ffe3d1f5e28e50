//! Metadata store trait definition.
//!
//! [`MetadataStore`] defines the storage contract for per-pipeline
//! incremental progress. Model types live in [`driftsync_types::state`].

use driftsync_types::{PipelineMetadata, PipelineName};

use crate::error;

/// Storage contract for pipeline metadata.
///
/// Each call must be atomic: a concurrent reader observes either the row
/// from before a `save_metadata` or the row after it, never a half-written
/// mix. Implementations must be `Send + Sync` for use behind
/// `Arc<dyn MetadataStore>`.
pub trait MetadataStore: Send + Sync {
    /// Read the metadata row for a pipeline.
    ///
    /// Returns `Ok(None)` when the pipeline has never been persisted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_metadata(&self, pipeline: &PipelineName) -> error::Result<Option<PipelineMetadata>>;

    /// Upsert the metadata row for a pipeline in a single write.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_metadata(&self, metadata: &PipelineMetadata) -> error::Result<()>;

    /// Delete the metadata row for a pipeline, resetting it to the
    /// never-run state. Deleting an absent row is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete_metadata(&self, pipeline: &PipelineName) -> error::Result<()>;
}
