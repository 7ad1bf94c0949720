//! End-of-batch summary and JSON report.

use std::path::Path;
use tracing::{info, warn};

use vstream_models::{BatchReport, JobOutcome, WorkerStatus};

use crate::error::WorkerResult;

/// One-line overall summary, e.g. `2 completed, 0 failed, 0 skipped, 0 unprocessed`.
pub fn summary_line(report: &BatchReport) -> String {
    report.counts().to_string()
}

/// Log per-worker and overall counts, and every failure with enough context
/// to re-run it.
pub fn log_summary(report: &BatchReport) {
    for worker in &report.workers {
        let counts = worker.counts();
        match &worker.status {
            WorkerStatus::EngineInitFailed { message } => warn!(
                worker_id = worker.worker_id,
                jobs = worker.assigned,
                "Worker failed before processing its shard: {}",
                message
            ),
            WorkerStatus::Terminated => warn!(
                worker_id = worker.worker_id,
                "Worker terminated: {}",
                counts
            ),
            status => info!(
                worker_id = worker.worker_id,
                status = status.as_str(),
                artifacts = counts.artifacts,
                "Worker summary: {}",
                counts
            ),
        }

        for job in &worker.jobs {
            if let JobOutcome::Failed { reason } = &job.outcome {
                warn!(
                    worker_id = worker.worker_id,
                    index = job.index,
                    identifier = %job.identifier,
                    stage = job.stage.as_str(),
                    reason = reason.kind(),
                    "Failed job: {}",
                    reason
                );
            }
        }
    }

    let counts = report.counts();
    info!(
        run_id = %report.run_id,
        interrupted = report.interrupted,
        workers = report.workers.len(),
        worker_failures = counts.worker_failures,
        artifacts = counts.artifacts,
        elapsed_secs = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0,
        "Batch finished: {}",
        counts
    );
}

/// Write the report as pretty JSON, creating parent directories.
pub async fn write_report(report: &BatchReport, path: &Path) -> WorkerResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(path, json).await?;
    info!("Batch report written to {}", path.display());
    Ok(())
}
