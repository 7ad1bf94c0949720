//! Worker: drives one shard through the job pipeline.
//!
//! A worker waits out its start delay, creates its scratch directory, binds
//! its engine, and runs its jobs in input order. Shutdown requests are checked
//! between jobs, so an in-flight job always finishes. The engine is shut
//! down and the scratch directory removed on the way out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use vstream_media::fs_utils::remove_dir_if_exists;
use vstream_media::{EngineFactory, EngineHandle};
use vstream_models::{WorkerReport, WorkerShard, WorkerStatus};

use crate::metrics;
use crate::pipeline::{EngineAccess, JobPipeline};

/// Scratch directory for one worker's downloads.
pub fn worker_temp_dir(work_root: &Path, worker_id: usize) -> PathBuf {
    work_root.join(format!("worker_{}", worker_id))
}

/// Engine source for a worker.
#[derive(Clone)]
pub enum WorkerEngine {
    /// Create and own a private handle
    Factory(Arc<dyn EngineFactory>),
    /// Use a handle shared with other workers
    Shared(Arc<Mutex<EngineHandle>>),
    /// No engine (download-only runs)
    Disabled,
}

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is gone without requesting it.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|&requested| requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub struct Worker {
    shard: WorkerShard,
    pipeline: JobPipeline,
    work_root: PathBuf,
    start_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        shard: WorkerShard,
        pipeline: JobPipeline,
        work_root: impl Into<PathBuf>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            shard,
            pipeline,
            work_root: work_root.into(),
            start_delay: Duration::ZERO,
            shutdown,
        }
    }

    /// Delay before this worker touches anything.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn worker_id(&self) -> usize {
        self.shard.worker_id
    }

    pub fn temp_dir(&self) -> PathBuf {
        worker_temp_dir(&self.work_root, self.shard.worker_id)
    }

    pub async fn run(mut self, engine: WorkerEngine) -> WorkerReport {
        let worker_id = self.shard.worker_id;
        let assigned = self.shard.len();

        if !self.wait_for_start().await {
            info!(worker_id, "Shutdown requested before start");
            let mut report = WorkerReport::new(worker_id, assigned);
            report.status = WorkerStatus::Interrupted;
            return report;
        }

        let temp_dir = self.temp_dir();
        if let Err(e) = tokio::fs::create_dir_all(&temp_dir).await {
            warn!(worker_id, "Failed to create {}: {}", temp_dir.display(), e);
        }

        let engine = match self.acquire_engine(engine).await {
            Ok(engine) => engine,
            Err(message) => {
                warn!(
                    worker_id,
                    jobs = assigned,
                    "Engine initialization failed, shard abandoned: {}",
                    message
                );
                metrics::record_worker_failure();
                self.remove_temp_dir(&temp_dir).await;
                return WorkerReport::engine_init_failed(worker_id, assigned, message);
            }
        };

        info!(worker_id, jobs = assigned, "Worker started");
        let report = self.run_jobs(engine, &temp_dir).await;
        self.remove_temp_dir(&temp_dir).await;

        info!(
            worker_id,
            status = report.status.as_str(),
            "Worker finished: {}",
            report.counts()
        );
        report
    }

    async fn run_jobs(&self, mut engine: Option<EngineAccess>, temp_dir: &Path) -> WorkerReport {
        let worker_id = self.shard.worker_id;
        let mut report = WorkerReport::new(worker_id, self.shard.len());

        for job in &self.shard.jobs {
            if *self.shutdown.borrow() {
                info!(
                    worker_id,
                    remaining = report.assigned - report.jobs.len(),
                    "Shutdown requested, not starting further jobs"
                );
                report.status = WorkerStatus::Interrupted;
                break;
            }
            let job_report = self
                .pipeline
                .run_job(worker_id, job, temp_dir, engine.as_mut())
                .await;
            report.jobs.push(job_report);
        }

        if let Some(EngineAccess::Owned(mut handle)) = engine {
            handle.shutdown();
        }
        report
    }

    /// Sleep out the start delay. Returns `false` if shutdown came first.
    async fn wait_for_start(&mut self) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        if self.start_delay.is_zero() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.start_delay) => true,
            _ = shutdown_requested(&mut self.shutdown) => false,
        }
    }

    async fn acquire_engine(&self, engine: WorkerEngine) -> Result<Option<EngineAccess>, String> {
        if !self.pipeline.needs_engine() {
            return Ok(None);
        }

        match engine {
            WorkerEngine::Factory(factory) => {
                let mut handle = factory.create().await.map_err(|e| e.to_string())?;
                // A failed handle is dropped here, which shuts it down
                handle.initialize().await.map_err(|e| e.to_string())?;
                Ok(Some(EngineAccess::Owned(handle)))
            }
            WorkerEngine::Shared(handle) => Ok(Some(EngineAccess::Shared(handle))),
            WorkerEngine::Disabled => Err("no engine configured for clip extraction".to_string()),
        }
    }

    async fn remove_temp_dir(&self, temp_dir: &Path) {
        if let Err(e) = remove_dir_if_exists(temp_dir).await {
            warn!(
                worker_id = self.shard.worker_id,
                "Failed to remove {}: {}",
                temp_dir.display(),
                e
            );
        }
    }
}
