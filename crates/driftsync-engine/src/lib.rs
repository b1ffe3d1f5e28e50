//! Incremental ETL orchestration engine.
//!
//! Pulls rows created since a persisted watermark, fans them out to one or
//! more loaders, and advances the watermark only after every loader
//! confirms success. The engine is a library: scheduling (and the
//! at-most-one-run-per-pipeline guarantee) belongs to the caller.

pub mod cursor;
pub mod error;
pub mod evict;
pub mod extract;
pub mod load;
pub mod orchestrator;
pub mod pipeline;
pub mod signal;
pub mod transform;

// Re-export public API for convenience
pub use cursor::batch::{BatchCursor, BatchStream, PageFetcher};
pub use cursor::fan_out::{FanOutCursor, FanOutReader};
pub use error::CursorError;
pub use evict::EvictingMap;
pub use extract::{Extractor, PageExtractor, PageQuery, RecordStream};
pub use load::{BatchLoader, BatchOutcome, BatchSink, Loader};
pub use orchestrator::{Orchestrator, PipelineRunner};
pub use pipeline::Pipeline;
pub use signal::{CompletionSignal, Subscriber};
pub use transform::{Aggregator, Transform};
