//! Process-isolated execution.
//!
//! The supervisor writes one assignment file per shard, re-executes the
//! binary with the hidden `worker` subcommand for each, and joins on the
//! JSON reports the children leave behind. Each child owns its own engine
//! and device context; nothing else is shared.
//!
//! On interruption every running child gets SIGTERM and stops between jobs.
//! Children still alive after the grace period are killed and reported as
//! terminated.

use chrono::Utc;
use futures::future::join_all;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vstream_media::fs_utils::remove_dir_if_exists;
use vstream_media::YtDlpDownloader;
use vstream_models::{BatchReport, WorkerReport, WorkerShard};

use crate::config::BatchSettings;
use crate::error::{WorkerError, WorkerResult};
use crate::worker::{worker_temp_dir, Worker, WorkerEngine};

/// Everything a worker process needs, written once before it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub run_id: Uuid,
    pub shard: WorkerShard,
    #[serde(with = "vstream_models::duration_secs")]
    pub start_delay: Duration,
    pub settings: BatchSettings,
}

/// Spawns and joins worker processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    program: PathBuf,
    program_args: Vec<String>,
    log_level: String,
}

impl ProcessSupervisor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            program_args: Vec::new(),
            log_level: "info".to_string(),
        }
    }

    /// Re-execute the running binary.
    pub fn for_current_exe() -> WorkerResult<Self> {
        let program = std::env::current_exe().map_err(|e| {
            WorkerError::worker_process(format!("cannot locate current executable: {}", e))
        })?;
        Ok(Self::new(program))
    }

    /// Arguments placed before the `worker` subcommand.
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    /// Log level handed to children through `VSTREAM_LOG_LEVEL`.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn run_dir(work_root: &Path, run_id: Uuid) -> PathBuf {
        work_root.join(format!("run_{}", run_id))
    }

    /// Run every shard in its own process until all have exited or
    /// `interrupt` resolves and the grace period runs out.
    pub async fn run<I>(
        &self,
        settings: &BatchSettings,
        shards: Vec<WorkerShard>,
        interrupt: I,
    ) -> WorkerResult<BatchReport>
    where
        I: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_dir = Self::run_dir(&settings.work_dir, run_id);
        tokio::fs::create_dir_all(&run_dir).await?;

        info!(
            %run_id,
            workers = shards.len(),
            program = %self.program.display(),
            "Starting process-isolated batch"
        );

        let assigned: Vec<(usize, usize)> =
            shards.iter().map(|s| (s.worker_id, s.len())).collect();
        let mut pids: HashMap<usize, Pid> = HashMap::new();
        let mut tasks = JoinSet::new();

        for (i, shard) in shards.into_iter().enumerate() {
            let worker_id = shard.worker_id;
            let assignment = WorkerAssignment {
                run_id,
                shard,
                start_delay: settings.start_delay.saturating_mul(i as u32),
                settings: settings.clone(),
            };
            let assignment_path = assignment_path(&run_dir, worker_id);
            write_json_atomic(&assignment_path, &assignment).await?;

            match self.spawn(&assignment_path, &report_path(&run_dir, worker_id)) {
                Ok(mut child) => {
                    if let Some(pid) = child.id() {
                        debug!(worker_id, pid, "Worker process spawned");
                        pids.insert(worker_id, Pid::from_raw(pid as i32));
                    }
                    tasks.spawn(async move { (worker_id, child.wait().await) });
                }
                Err(e) => error!(worker_id, "Failed to spawn worker process: {}", e),
            }
        }

        let mut exited = HashSet::new();
        let mut interrupted = false;

        tokio::pin!(interrupt);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => record_exit(joined, &mut exited),
                    None => break,
                },
                _ = &mut interrupt => {
                    interrupted = true;
                    info!(
                        grace_period_secs = settings.grace_period.as_secs_f64(),
                        "Interrupt received, asking worker processes to stop"
                    );
                    terminate(&pids, &exited);
                    break;
                }
            }
        }

        if interrupted {
            let deadline = tokio::time::sleep(settings.grace_period);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    joined = tasks.join_next() => match joined {
                        Some(joined) => record_exit(joined, &mut exited),
                        None => break,
                    },
                    _ = &mut deadline => {
                        warn!(running = tasks.len(), "Grace period elapsed, killing worker processes");
                        // Dropping a child kills it
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        break;
                    }
                }
            }
        }

        let collected = join_all(assigned.iter().map(|&(worker_id, _)| {
            let path = report_path(&run_dir, worker_id);
            async move { read_json::<WorkerReport>(&path).await }
        }))
        .await;

        let mut reports = Vec::with_capacity(assigned.len());
        for ((worker_id, count), collected) in assigned.into_iter().zip(collected) {
            match collected {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(worker_id, "No usable report from worker process: {}", e);
                    let temp_dir = worker_temp_dir(&settings.work_dir, worker_id);
                    if let Err(e) = remove_dir_if_exists(&temp_dir).await {
                        warn!(worker_id, "Failed to reclaim {}: {}", temp_dir.display(), e);
                    }
                    reports.push(WorkerReport::terminated(worker_id, count));
                }
            }
        }

        if let Err(e) = remove_dir_if_exists(&run_dir).await {
            warn!("Failed to remove {}: {}", run_dir.display(), e);
        }

        Ok(BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            interrupted,
            workers: reports,
        })
    }

    fn spawn(&self, assignment: &Path, report: &Path) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.program_args)
            .arg("worker")
            .arg("--assignment")
            .arg(assignment)
            .arg("--report")
            .arg(report)
            .env("VSTREAM_LOG_LEVEL", &self.log_level)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

fn assignment_path(run_dir: &Path, worker_id: usize) -> PathBuf {
    run_dir.join(format!("worker_{}.assignment.json", worker_id))
}

fn report_path(run_dir: &Path, worker_id: usize) -> PathBuf {
    run_dir.join(format!("worker_{}.report.json", worker_id))
}

fn record_exit(
    joined: Result<(usize, std::io::Result<ExitStatus>), tokio::task::JoinError>,
    exited: &mut HashSet<usize>,
) {
    match joined {
        Ok((worker_id, Ok(status))) => {
            exited.insert(worker_id);
            if status.success() {
                debug!(worker_id, "Worker process exited");
            } else {
                warn!(worker_id, %status, "Worker process exited abnormally");
            }
        }
        Ok((worker_id, Err(e))) => {
            exited.insert(worker_id);
            error!(worker_id, "Failed to wait for worker process: {}", e);
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!("Worker wait task failed: {}", e),
    }
}

fn terminate(pids: &HashMap<usize, Pid>, exited: &HashSet<usize>) {
    for (&worker_id, &pid) in pids {
        if exited.contains(&worker_id) {
            continue;
        }
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            warn!(worker_id, %pid, "Failed to signal worker process: {}", e);
        }
    }
}

/// Write JSON next to `path` and rename it into place, so readers never see
/// a partial file.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> WorkerResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> WorkerResult<T> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Body of the hidden `worker` subcommand.
///
/// Runs the assigned shard with a private engine and writes the report.
/// `interrupt` stops the worker between jobs.
pub async fn run_worker_process<I>(
    assignment_path: &Path,
    report_path: &Path,
    interrupt: I,
) -> WorkerResult<WorkerReport>
where
    I: Future<Output = ()>,
{
    let assignment: WorkerAssignment = read_json(assignment_path).await?;
    let settings = &assignment.settings;
    let worker_id = assignment.shard.worker_id;
    info!(worker_id, run_id = %assignment.run_id, pid = std::process::id(), "Worker process starting");

    let pipeline = settings.pipeline(Arc::new(YtDlpDownloader::new(settings.download.clone())));
    let engine = match settings.engine_factory() {
        Some(factory) => WorkerEngine::Factory(Arc::new(factory)),
        None => WorkerEngine::Disabled,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Worker::new(assignment.shard, pipeline, &settings.work_dir, shutdown_rx)
        .with_start_delay(assignment.start_delay)
        .run(engine);
    tokio::pin!(worker);
    tokio::pin!(interrupt);

    let report = tokio::select! {
        report = &mut worker => report,
        _ = &mut interrupt => {
            info!(worker_id, "Stop requested, finishing the current job");
            let _ = shutdown_tx.send(true);
            worker.await
        }
    };

    write_json_atomic(report_path, &report).await?;
    Ok(report)
}
