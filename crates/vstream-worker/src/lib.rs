//! Parallel clip-extraction batches.
//!
//! This crate provides:
//! - Configuration (CLI, environment, validation)
//! - Input partitioning into per-worker shards
//! - The fetch adapter with bounded retries
//! - Clip manifests, segment extraction and artifact persistence
//! - The per-job pipeline and workers
//! - In-process and process-isolated batch coordination
//! - Batch summaries and JSON reports

pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod retry;
pub mod segmenter;
pub mod signal;
pub mod source;
pub mod summary;
pub mod supervisor;
pub mod worker;

pub use batch::run_batch;
pub use config::{BatchMode, BatchSettings, Cli, Command, ExecutionModel};
pub use coordinator::{BatchCoordinator, EngineStrategy};
pub use error::{WorkerError, WorkerResult};
pub use fetch::FetchAdapter;
pub use logging::JobLogger;
pub use manifest::{ClipManifestReader, ManifestLookup, ManifestPolicy};
pub use partition::{partition, PartitionLayout};
pub use pipeline::{EngineAccess, JobPipeline, PipelineMode};
pub use retry::{BackoffKind, RetryPolicy};
pub use summary::summary_line;
pub use supervisor::{ProcessSupervisor, WorkerAssignment};
pub use worker::{Worker, WorkerEngine};
