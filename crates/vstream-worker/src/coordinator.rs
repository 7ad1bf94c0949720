//! In-process batch coordinator.
//!
//! Runs every worker as a task of this process. Workers either own a private
//! engine each or share one handle behind a mutex. On interruption the
//! coordinator stops new jobs, waits up to the grace period for in-flight
//! jobs, then aborts whatever is still running.

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use vstream_media::fs_utils::remove_dir_if_exists;
use vstream_media::EngineFactory;
use vstream_models::{BatchReport, WorkerReport, WorkerShard};

use crate::pipeline::JobPipeline;
use crate::worker::{worker_temp_dir, Worker, WorkerEngine};

/// Default time in-flight jobs get to finish after an interruption.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// How workers of an in-process batch get their engine.
#[derive(Clone)]
pub enum EngineStrategy {
    /// Every worker creates and owns a private handle
    PerWorker(Arc<dyn EngineFactory>),
    /// One handle for the whole batch, locked per job
    Shared(Arc<dyn EngineFactory>),
    /// No engine (download-only runs)
    Disabled,
}

pub struct BatchCoordinator {
    pipeline: JobPipeline,
    engine: EngineStrategy,
    work_root: PathBuf,
    start_delay: Duration,
    grace_period: Duration,
}

impl BatchCoordinator {
    pub fn new(pipeline: JobPipeline, engine: EngineStrategy, work_root: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            engine,
            work_root: work_root.into(),
            start_delay: Duration::ZERO,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Worker `i` starts after `i * delay`.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Run every shard to completion or until `interrupt` resolves.
    pub async fn run<I>(&self, shards: Vec<WorkerShard>, interrupt: I) -> BatchReport
    where
        I: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let assigned: HashMap<usize, usize> =
            shards.iter().map(|s| (s.worker_id, s.len())).collect();

        info!(%run_id, workers = shards.len(), "Starting in-process batch");

        let worker_engine = match self.worker_engine().await {
            Ok(engine) => engine,
            Err(message) => {
                error!("Shared engine initialization failed: {}", message);
                let workers = shards
                    .iter()
                    .map(|s| WorkerReport::engine_init_failed(s.worker_id, s.len(), message.clone()))
                    .collect();
                return BatchReport {
                    run_id,
                    started_at,
                    finished_at: Utc::now(),
                    interrupted: false,
                    workers,
                };
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for (i, shard) in shards.into_iter().enumerate() {
            let worker = Worker::new(
                shard,
                self.pipeline.clone(),
                &self.work_root,
                shutdown_rx.clone(),
            )
            .with_start_delay(self.start_delay.saturating_mul(i as u32));
            let engine = worker_engine.clone();
            tasks.spawn(worker.run(engine));
        }

        let mut reports = Vec::with_capacity(assigned.len());
        let mut interrupted = false;

        tokio::pin!(interrupt);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => collect(joined, &mut reports),
                    None => break,
                },
                _ = &mut interrupt => {
                    interrupted = true;
                    info!(
                        grace_period_secs = self.grace_period.as_secs_f64(),
                        "Interrupt received, letting in-flight jobs finish"
                    );
                    let _ = shutdown_tx.send(true);
                    break;
                }
            }
        }

        if interrupted {
            let deadline = tokio::time::sleep(self.grace_period);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    joined = tasks.join_next() => match joined {
                        Some(joined) => collect(joined, &mut reports),
                        None => break,
                    },
                    _ = &mut deadline => {
                        warn!(running = tasks.len(), "Grace period elapsed, terminating workers");
                        tasks.abort_all();
                        while let Some(joined) = tasks.join_next().await {
                            collect(joined, &mut reports);
                        }
                        break;
                    }
                }
            }
        }

        // Workers without a report were aborted or panicked
        for (&worker_id, &count) in &assigned {
            if reports.iter().all(|r| r.worker_id != worker_id) {
                let temp_dir = worker_temp_dir(&self.work_root, worker_id);
                if let Err(e) = remove_dir_if_exists(&temp_dir).await {
                    warn!(worker_id, "Failed to reclaim {}: {}", temp_dir.display(), e);
                }
                reports.push(WorkerReport::terminated(worker_id, count));
            }
        }
        reports.sort_by_key(|r| r.worker_id);

        if let WorkerEngine::Shared(handle) = worker_engine {
            handle.lock().await.shutdown();
        }

        BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            interrupted,
            workers: reports,
        }
    }

    async fn worker_engine(&self) -> Result<WorkerEngine, String> {
        match &self.engine {
            EngineStrategy::PerWorker(factory) => Ok(WorkerEngine::Factory(Arc::clone(factory))),
            EngineStrategy::Disabled => Ok(WorkerEngine::Disabled),
            EngineStrategy::Shared(factory) if self.pipeline.needs_engine() => {
                let mut handle = factory.create().await.map_err(|e| e.to_string())?;
                handle.initialize().await.map_err(|e| e.to_string())?;
                Ok(WorkerEngine::Shared(Arc::new(Mutex::new(handle))))
            }
            EngineStrategy::Shared(_) => Ok(WorkerEngine::Disabled),
        }
    }
}

fn collect(joined: Result<WorkerReport, tokio::task::JoinError>, reports: &mut Vec<WorkerReport>) {
    match joined {
        Ok(report) => reports.push(report),
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!("Worker task failed: {}", e),
    }
}
