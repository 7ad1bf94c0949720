//! Batch entry point: validate, partition, dispatch to an execution model,
//! summarize.

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use vstream_media::{check_ffmpeg, check_ytdlp, YtDlpDownloader};
use vstream_models::BatchReport;

use crate::config::{BatchSettings, ExecutionModel};
use crate::coordinator::BatchCoordinator;
use crate::error::WorkerResult;
use crate::partition::partition;
use crate::summary::{log_summary, write_report};
use crate::supervisor::ProcessSupervisor;

/// Run a whole batch.
///
/// Only configuration problems are returned as errors; job and worker
/// failures end up in the report.
pub async fn run_batch<I>(
    settings: &BatchSettings,
    log_level: &str,
    interrupt: I,
) -> WorkerResult<BatchReport>
where
    I: Future<Output = ()>,
{
    settings.check()?;

    let jobs = settings.load_jobs().await?;
    let job_count = jobs.len();
    let shards = partition(jobs, settings.workers, settings.partition)?;
    info!(
        jobs = job_count,
        workers = shards.len(),
        model = ?settings.execution_model(),
        "Batch planned"
    );

    if let Err(e) = check_ytdlp() {
        warn!("{}; every download will fail", e);
    }
    if settings.engine_factory().is_some() {
        if let Err(e) = check_ffmpeg() {
            warn!("{}; engines will fail to initialize", e);
        }
    }

    let report = match settings.execution_model() {
        ExecutionModel::Isolated => {
            ProcessSupervisor::for_current_exe()?
                .with_log_level(log_level)
                .run(settings, shards, interrupt)
                .await?
        }
        ExecutionModel::Shared => {
            let downloader = Arc::new(YtDlpDownloader::new(settings.download.clone()));
            BatchCoordinator::new(
                settings.pipeline(downloader),
                settings.engine_strategy(),
                &settings.work_dir,
            )
            .with_start_delay(settings.start_delay)
            .with_grace_period(settings.grace_period)
            .run(shards, interrupt)
            .await
        }
    };

    log_summary(&report);
    if let Some(path) = &settings.report_path {
        if let Err(e) = write_report(&report, path).await {
            warn!("Failed to write batch report to {}: {}", path.display(), e);
        }
    }

    Ok(report)
}
