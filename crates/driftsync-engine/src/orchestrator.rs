//! Runs configured pipelines against the persisted metadata store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use driftsync_state::MetadataStore;
use driftsync_types::{LoadError, PipelineMetadata, PipelineName, Record, RunResult, RunStatus};

use crate::pipeline::Pipeline;

/// Rows fetched per page/batch unless overridden.
const DEFAULT_BATCH_SIZE: usize = 1000;

/// Object-safe view of a pipeline, so one orchestrator can drive
/// pipelines over different row types.
pub trait PipelineRunner: Send + Sync {
    fn name(&self) -> &PipelineName;

    fn run<'a>(
        &'a self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = RunResult> + Send + 'a>>;

    /// Delete previously loaded data (rerun support).
    ///
    /// # Errors
    ///
    /// Returns the first [`LoadError`] raised by a loader.
    fn clean_up(&self) -> Result<(), LoadError>;
}

impl<T: Record> PipelineRunner for Pipeline<T> {
    fn name(&self) -> &PipelineName {
        Pipeline::name(self)
    }

    fn run<'a>(
        &'a self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = RunResult> + Send + 'a>> {
        Box::pin(Pipeline::run(self, since, until, batch_size))
    }

    fn clean_up(&self) -> Result<(), LoadError> {
        Pipeline::clean_up(self)
    }
}

/// Sequentially executes a set of named pipelines, deriving each run's
/// window from persisted metadata and writing the outcome back.
///
/// The orchestrator does not enforce single-flight execution per pipeline;
/// the external scheduler must guarantee at most one in-flight run per
/// pipeline name.
pub struct Orchestrator {
    store: Arc<dyn MetadataStore>,
    pipelines: Vec<Arc<dyn PipelineRunner>>,
    batch_size: usize,
    run_deadline: Option<Duration>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            pipelines: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            run_deadline: None,
        }
    }

    /// Register a pipeline; configuration order is execution order.
    #[must_use]
    pub fn register<T: Record>(mut self, pipeline: Pipeline<T>) -> Self {
        self.pipelines.push(Arc::new(pipeline));
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Treat any single pipeline run exceeding `deadline` as failed.
    /// The watermark is untouched, exactly like any other failure.
    #[must_use]
    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = Some(deadline);
        self
    }

    /// Run every registered pipeline once, in configuration order.
    ///
    /// Failures (including metadata store failures) are folded into the
    /// affected pipeline's `RunResult`; one pipeline's failure never stops
    /// the others.
    pub async fn run_all(&self) -> Vec<RunResult> {
        tracing::info!(pipelines = self.pipelines.len(), "ETL run starting");
        let started = Instant::now();
        let mut results = Vec::with_capacity(self.pipelines.len());
        for pipeline in &self.pipelines {
            results.push(self.run_pipeline(pipeline.as_ref()).await);
        }

        let rows: u64 = results.iter().map(|r| r.rows_processed).sum();
        let failures = results.iter().filter(|r| !r.success).count();
        if rows == 0 && failures == 0 {
            tracing::info!(
                duration_ms = started.elapsed().as_millis() as u64,
                "ETL run completed, no new rows"
            );
        } else {
            tracing::info!(
                duration_ms = started.elapsed().as_millis() as u64,
                rows,
                failures,
                "ETL run completed"
            );
        }
        results
    }

    /// Reset every pipeline to its never-run state and run again.
    ///
    /// Deletes each pipeline's metadata row (watermark back to epoch) and,
    /// when `with_data_deletion` is set, asks its loaders to delete
    /// previously loaded data first.
    pub async fn rerun(&self, with_data_deletion: bool) -> Vec<RunResult> {
        tracing::info!(
            with_data_deletion,
            "Deleting pipeline metadata for rerun"
        );
        let mut results = Vec::with_capacity(self.pipelines.len());
        for pipeline in &self.pipelines {
            if let Err(e) = self.reset_pipeline(pipeline, with_data_deletion).await {
                tracing::error!(
                    pipeline = pipeline.name().as_str(),
                    "Rerun reset failed: {e}"
                );
                results.push(RunResult::failed(
                    pipeline.name().clone(),
                    format!("rerun reset failed: {e}"),
                ));
                continue;
            }
            results.push(self.run_pipeline(pipeline.as_ref()).await);
        }
        results
    }

    async fn reset_pipeline(
        &self,
        pipeline: &Arc<dyn PipelineRunner>,
        with_data_deletion: bool,
    ) -> anyhow::Result<()> {
        let name = pipeline.name().clone();
        let store = Arc::clone(&self.store);
        let deleted_name = name.clone();
        tokio::task::spawn_blocking(move || store.delete_metadata(&deleted_name))
            .await
            .map_err(|e| anyhow::anyhow!("delete_metadata task panicked: {e}"))??;

        if with_data_deletion {
            let pipeline = Arc::clone(pipeline);
            tokio::task::spawn_blocking(move || pipeline.clean_up())
                .await
                .map_err(|e| anyhow::anyhow!("clean_up task panicked: {e}"))??;
            tracing::info!(pipeline = name.as_str(), "Loaded data deleted for rerun");
        }
        Ok(())
    }

    async fn run_pipeline(&self, pipeline: &dyn PipelineRunner) -> RunResult {
        let name = pipeline.name().clone();
        let metadata = match self.load_metadata(&name).await {
            Ok(metadata) => metadata,
            Err(message) => {
                tracing::error!(pipeline = name.as_str(), "Metadata read failed: {message}");
                return RunResult::failed(name, format!("metadata read failed: {message}"));
            }
        };

        let since = metadata.last_processed_at;
        let until = Utc::now();
        tracing::info!(
            pipeline = name.as_str(),
            since = %since,
            until = %until,
            "Pipeline run starting"
        );

        let started = Instant::now();
        let result = match self.run_deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline, pipeline.run(since, until, self.batch_size))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => RunResult::failed(
                        name.clone(),
                        format!("run exceeded deadline of {}ms", deadline.as_millis()),
                    ),
                }
            }
            None => pipeline.run(since, until, self.batch_size).await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let updated = PipelineMetadata {
            pipeline: name.clone(),
            // A watermark only moves on success; a successful pass that
            // persisted nothing keeps the previous one.
            last_processed_at: if result.success {
                result.last_processed_at.unwrap_or(metadata.last_processed_at)
            } else {
                metadata.last_processed_at
            },
            last_run_at: Utc::now(),
            duration_ms: elapsed_ms,
            status: if result.success {
                RunStatus::Success
            } else {
                RunStatus::Failure
            },
            rows_processed: if result.success { result.rows_processed } else { 0 },
            error_message: result.error_message.clone(),
        };

        if let Err(message) = self.save_metadata(updated).await {
            tracing::error!(pipeline = name.as_str(), "Metadata write failed: {message}");
            return RunResult::failed(name, format!("metadata write failed: {message}"));
        }

        if result.success {
            tracing::info!(
                pipeline = name.as_str(),
                rows = result.rows_processed,
                duration_ms = elapsed_ms,
                "Pipeline run completed"
            );
        } else {
            tracing::error!(
                pipeline = name.as_str(),
                duration_ms = elapsed_ms,
                error = result.error_message.as_deref().unwrap_or("unknown"),
                "Pipeline run failed"
            );
        }
        result
    }

    async fn load_metadata(&self, name: &PipelineName) -> Result<PipelineMetadata, String> {
        let store = Arc::clone(&self.store);
        let lookup = name.clone();
        let loaded = tokio::task::spawn_blocking(move || store.get_metadata(&lookup))
            .await
            .map_err(|e| format!("get_metadata task panicked: {e}"))?
            .map_err(|e| e.to_string())?;
        Ok(loaded.unwrap_or_else(|| PipelineMetadata::initial(name.clone())))
    }

    async fn save_metadata(&self, metadata: PipelineMetadata) -> Result<(), String> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save_metadata(&metadata))
            .await
            .map_err(|e| format!("save_metadata task panicked: {e}"))?
            .map_err(|e| e.to_string())
    }
}
