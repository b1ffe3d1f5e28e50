//! One extract-and-load pass over an incremental window.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use driftsync_types::{LoadError, LoadResult, Record, RunResult};
use driftsync_types::PipelineName;
use tokio::task::JoinSet;

use crate::cursor::fan_out::FanOutCursor;
use crate::extract::{Extractor, RecordStream};
use crate::load::Loader;
use crate::signal::CompletionSignal;
use crate::transform::Transform;

/// One loader plus its optional private transform.
struct LoaderSlot<T: Record> {
    transform: Option<Arc<dyn Transform<T>>>,
    loader: Arc<dyn Loader<T>>,
}

impl<T: Record> Clone for LoaderSlot<T> {
    fn clone(&self) -> Self {
        Self {
            transform: self.transform.clone(),
            loader: Arc::clone(&self.loader),
        }
    }
}

/// Immutable binding of one extractor to one or more loaders.
///
/// Stateless between runs: all incremental progress lives in the metadata
/// store owned by the orchestrator.
pub struct Pipeline<T: Record> {
    name: PipelineName,
    extractor: Arc<dyn Extractor<T>>,
    loaders: Vec<LoaderSlot<T>>,
}

impl<T: Record> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            extractor: Arc::clone(&self.extractor),
            loaders: self.loaders.clone(),
        }
    }
}

impl<T: Record> Pipeline<T> {
    pub fn new(name: impl Into<PipelineName>, extractor: Arc<dyn Extractor<T>>) -> Self {
        Self {
            name: name.into(),
            extractor,
            loaders: Vec::new(),
        }
    }

    /// Append a loader.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn Loader<T>>) -> Self {
        self.loaders.push(LoaderSlot {
            transform: None,
            loader,
        });
        self
    }

    /// Append a loader fed through its own transform.
    #[must_use]
    pub fn with_transformed_loader(
        mut self,
        transform: Arc<dyn Transform<T>>,
        loader: Arc<dyn Loader<T>>,
    ) -> Self {
        self.loaders.push(LoaderSlot {
            transform: Some(transform),
            loader,
        });
        self
    }

    #[must_use]
    pub fn name(&self) -> &PipelineName {
        &self.name
    }

    /// Delete everything the loaders have persisted (rerun support).
    ///
    /// # Errors
    ///
    /// Returns the first [`LoadError`] raised by a loader.
    pub fn clean_up(&self) -> Result<(), LoadError> {
        for slot in &self.loaders {
            slot.loader.delete_all()?;
        }
        Ok(())
    }

    /// Execute one pass over the `(since, until]` window.
    ///
    /// The pass succeeds iff every loader reports success. On success,
    /// `rows_processed` sums the loaders' counts and `last_processed_at`
    /// is the minimum watermark across loaders that persisted rows: the
    /// pass never claims progress past its slowest consumer. On failure,
    /// `rows_processed` is 0 and no watermark is reported, so the caller
    /// keeps its previous one.
    pub async fn run(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        batch_size: usize,
    ) -> RunResult {
        if self.loaders.is_empty() {
            return RunResult::failed(self.name.clone(), "pipeline has no loaders");
        }

        let extractor = Arc::clone(&self.extractor);
        let opened = tokio::task::spawn_blocking(move || {
            extractor.extract(since, until, batch_size)
        })
        .await;
        let stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::error!(
                    pipeline = self.name.as_str(),
                    extractor = self.extractor.name(),
                    "Extraction failed: {e}"
                );
                return RunResult::failed(
                    self.name.clone(),
                    format!("extractor '{}': {e}", self.extractor.name()),
                );
            }
            Err(join_err) => {
                return RunResult::failed(
                    self.name.clone(),
                    format!("extractor task panicked: {join_err}"),
                );
            }
        };

        let outcomes = if self.loaders.len() == 1 {
            vec![self.run_single_loader(stream, batch_size).await]
        } else {
            self.run_fan_out(stream, batch_size).await
        };

        self.aggregate(outcomes)
    }

    async fn run_single_loader(
        &self,
        stream: RecordStream<T>,
        batch_size: usize,
    ) -> (String, LoadResult) {
        let slot = self.loaders[0].clone();
        let name = slot.loader.name().to_string();
        let joined = tokio::task::spawn_blocking(move || {
            let rows = match &slot.transform {
                Some(t) => t.apply(stream),
                None => stream,
            };
            slot.loader.load(rows, batch_size)
        })
        .await;
        (name.clone(), Self::settle(&name, joined))
    }

    /// Fan the stream out so each loader traverses it independently.
    ///
    /// Each loader task registers its reader and then subscribes to the
    /// start gate; readers consume nothing until the gate fires. Waiting
    /// for the full subscriber count before firing guarantees every reader
    /// is registered before the first buffer prune, so no loader can miss
    /// rows a faster sibling already consumed.
    async fn run_fan_out(
        &self,
        stream: RecordStream<T>,
        batch_size: usize,
    ) -> Vec<(String, LoadResult)> {
        let fan_out = FanOutCursor::new(stream);
        let gate: CompletionSignal<()> = CompletionSignal::new(self.loaders.len());
        let mut tasks: JoinSet<(String, Result<Result<LoadResult, LoadError>, String>)> =
            JoinSet::new();

        for slot in self.loaders.iter().cloned() {
            let fan_out = fan_out.clone();
            let gate = gate.clone();
            tasks.spawn(async move {
                let reader = fan_out.reader();
                let mut start = gate.subscribe();
                start.recv().await;

                let name = slot.loader.name().to_string();
                let joined = tokio::task::spawn_blocking(move || {
                    let rows: RecordStream<T> = Box::new(reader);
                    let rows = match &slot.transform {
                        Some(t) => t.apply(rows),
                        None => rows,
                    };
                    slot.loader.load(rows, batch_size)
                })
                .await
                .map_err(|e| e.to_string());
                (name, joined)
            });
        }

        let reached = gate.wait_for_subscribers(self.loaders.len()).await;
        if !reached {
            tracing::warn!(
                pipeline = self.name.as_str(),
                loaders = self.loaders.len(),
                "Timed out waiting for loader readers; starting anyway"
            );
        }
        gate.emit(());
        gate.complete();

        let mut outcomes = Vec::with_capacity(self.loaders.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(result))) => {
                    outcomes.push((name.clone(), Self::settle(&name, Ok(result))));
                }
                Ok((name, Err(panic_msg))) => {
                    outcomes.push((
                        name.clone(),
                        LoadResult::failed(format!("loader '{name}' task panicked: {panic_msg}")),
                    ));
                }
                Err(join_err) => {
                    outcomes.push((
                        String::from("unknown"),
                        LoadResult::failed(format!("loader task panicked: {join_err}")),
                    ));
                }
            }
        }
        outcomes
    }

    /// Convert a loader call's raw outcome into a `LoadResult`, catching
    /// errors and panics at the loader boundary.
    fn settle(
        name: &str,
        joined: Result<Result<LoadResult, LoadError>, tokio::task::JoinError>,
    ) -> LoadResult {
        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(loader = name, "Loader failed: {e}");
                LoadResult::failed(format!("loader '{name}': {e}"))
            }
            Err(join_err) => {
                tracing::error!(loader = name, "Loader task panicked: {join_err}");
                LoadResult::failed(format!("loader '{name}' task panicked: {join_err}"))
            }
        }
    }

    fn aggregate(&self, outcomes: Vec<(String, LoadResult)>) -> RunResult {
        let mut success = true;
        let mut rows: u64 = 0;
        let mut watermark: Option<DateTime<Utc>> = None;
        let mut errors: Vec<String> = Vec::new();

        for (name, outcome) in outcomes {
            if outcome.success {
                rows += outcome.processed_rows;
                if let Some(ts) = outcome.last_processed_at {
                    watermark = Some(watermark.map_or(ts, |w| w.min(ts)));
                }
            } else {
                success = false;
                errors.push(
                    outcome
                        .error_message
                        .unwrap_or_else(|| format!("loader '{name}' failed")),
                );
            }
        }

        if success {
            RunResult {
                pipeline: self.name.clone(),
                success: true,
                rows_processed: rows,
                last_processed_at: watermark,
                error_message: None,
            }
        } else {
            RunResult {
                pipeline: self.name.clone(),
                success: false,
                rows_processed: 0,
                last_processed_at: None,
                error_message: Some(errors.join("; ")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PageExtractor;
    use driftsync_types::ExtractError;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
        created_at: DateTime<Utc>,
    }

    impl Record for Row {
        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }

    fn ts(sec: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(sec, 0).unwrap()
    }

    fn row(id: u32) -> Row {
        Row {
            id,
            created_at: ts(i64::from(id)),
        }
    }

    fn extractor_over(data: Vec<Row>) -> Arc<dyn Extractor<Row>> {
        Arc::new(PageExtractor::new(
            "rows",
            move |since: DateTime<Utc>,
                  until: DateTime<Utc>,
                  offset: usize,
                  limit: usize|
                  -> Result<Vec<Row>, ExtractError> {
                Ok(data
                    .iter()
                    .filter(|r| r.created_at > since && r.created_at <= until)
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect())
            },
        ))
    }

    /// Loader that records everything it sees.
    struct CollectingLoader {
        name: String,
        seen: Mutex<Vec<u32>>,
    }

    impl CollectingLoader {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Loader<Row> for CollectingLoader {
        fn name(&self) -> &str {
            &self.name
        }

        fn load(&self, rows: RecordStream<Row>, _batch_size: usize) -> Result<LoadResult, LoadError> {
            let mut last = None;
            let mut count = 0;
            for item in rows {
                let row = item?;
                last = Some(row.created_at());
                count += 1;
                self.seen.lock().unwrap().push(row.id);
            }
            Ok(LoadResult {
                success: true,
                last_processed_at: last,
                processed_rows: count,
                error_message: None,
            })
        }
    }

    /// Loader that fails every row.
    struct FailingLoader;

    impl Loader<Row> for FailingLoader {
        fn name(&self) -> &str {
            "failing-loader"
        }

        fn load(&self, rows: RecordStream<Row>, _batch_size: usize) -> Result<LoadResult, LoadError> {
            for item in rows {
                let _ = item?;
                return Err(LoadError::sink(anyhow::anyhow!("simulated loader failure")));
            }
            Ok(LoadResult::empty())
        }
    }

    struct PanickingLoader;

    impl Loader<Row> for PanickingLoader {
        fn name(&self) -> &str {
            "panicking-loader"
        }

        fn load(&self, _rows: RecordStream<Row>, _batch_size: usize) -> Result<LoadResult, LoadError> {
            panic!("loader blew up");
        }
    }

    #[tokio::test]
    async fn single_loader_processes_window() {
        let loader = CollectingLoader::new("collector");
        let pipeline = Pipeline::new("simple", extractor_over((1..=3).map(row).collect()))
            .with_loader(loader.clone());

        let result = pipeline.run(ts(0), ts(100), 10).await;
        assert!(result.success);
        assert_eq!(result.rows_processed, 3);
        assert_eq!(result.last_processed_at, Some(ts(3)));
        assert_eq!(*loader.seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_window_succeeds_with_no_watermark() {
        let loader = CollectingLoader::new("collector");
        let pipeline =
            Pipeline::new("simple", extractor_over(vec![])).with_loader(loader.clone());

        let result = pipeline.run(ts(0), ts(100), 10).await;
        assert!(result.success);
        assert_eq!(result.rows_processed, 0);
        assert!(result.last_processed_at.is_none());
    }

    #[tokio::test]
    async fn fan_out_delivers_full_stream_to_every_loader() {
        let a = CollectingLoader::new("loader-a");
        let b = CollectingLoader::new("loader-b");
        let pipeline = Pipeline::new("fan-out", extractor_over((1..=20).map(row).collect()))
            .with_loader(a.clone())
            .with_loader(b.clone());

        let result = pipeline.run(ts(0), ts(100), 5).await;
        assert!(result.success);
        // Both loaders confirmed the same 20 logical rows.
        assert_eq!(result.rows_processed, 40);
        assert_eq!(result.last_processed_at, Some(ts(20)));
        assert_eq!(*a.seen.lock().unwrap(), (1..=20).collect::<Vec<u32>>());
        assert_eq!(*b.seen.lock().unwrap(), (1..=20).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn one_failing_loader_fails_the_pass_but_not_its_siblings() {
        let ok = CollectingLoader::new("healthy");
        let pipeline = Pipeline::new("mixed", extractor_over((1..=3).map(row).collect()))
            .with_loader(ok.clone())
            .with_loader(Arc::new(FailingLoader));

        let result = pipeline.run(ts(0), ts(100), 10).await;
        assert!(!result.success);
        assert_eq!(result.rows_processed, 0);
        assert!(result.last_processed_at.is_none());
        assert!(result.error_message.unwrap().contains("simulated loader failure"));
        // The healthy loader still drained the whole stream.
        assert_eq!(*ok.seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn loader_panic_is_contained() {
        let ok = CollectingLoader::new("healthy");
        let pipeline = Pipeline::new("panicky", extractor_over((1..=3).map(row).collect()))
            .with_loader(ok.clone())
            .with_loader(Arc::new(PanickingLoader));

        let result = pipeline.run(ts(0), ts(100), 10).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("panicked"));
        assert_eq!(*ok.seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn extraction_failure_fails_the_pass() {
        let extractor: Arc<dyn Extractor<Row>> = Arc::new(PageExtractor::new(
            "broken",
            |_: DateTime<Utc>, _: DateTime<Utc>, _: usize, _: usize| -> Result<Vec<Row>, ExtractError> {
                Err(ExtractError::new("db unreachable"))
            },
        ));
        let loader = CollectingLoader::new("collector");
        let pipeline = Pipeline::new("broken", extractor).with_loader(loader);

        let result = pipeline.run(ts(0), ts(100), 10).await;
        assert!(!result.success);
        assert_eq!(result.rows_processed, 0);
        assert!(result.error_message.unwrap().contains("db unreachable"));
    }

    #[tokio::test]
    async fn pipeline_without_loaders_fails() {
        let pipeline: Pipeline<Row> = Pipeline::new("hollow", extractor_over(vec![]));
        let result = pipeline.run(ts(0), ts(100), 10).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn transform_shapes_the_loader_view() {
        use crate::transform::Aggregator;

        // Rows 1..=4; aggregate by id parity, summing ids into the key row.
        let raw = CollectingLoader::new("raw");
        let agg = CollectingLoader::new("aggregated");
        let transform: Arc<dyn Transform<Row>> = Arc::new(Aggregator::new(
            "by-parity",
            16,
            |r: &Row| r.id % 2,
            |mut acc: Row, next: Row| {
                acc.id += next.id;
                acc.created_at = acc.created_at.max(next.created_at);
                acc
            },
        ));
        let pipeline = Pipeline::new("agg", extractor_over((1..=4).map(row).collect()))
            .with_loader(raw.clone())
            .with_transformed_loader(transform, agg.clone());

        let result = pipeline.run(ts(0), ts(100), 10).await;
        assert!(result.success);
        assert_eq!(*raw.seen.lock().unwrap(), vec![1, 2, 3, 4]);
        let mut aggregated = agg.seen.lock().unwrap().clone();
        aggregated.sort_unstable();
        // Odd ids 1+3 = 4, even ids 2+4 = 6.
        assert_eq!(aggregated, vec![4, 6]);
    }
}
