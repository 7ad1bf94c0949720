//! Tracing setup and structured job logging.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vstream_models::{FailureReason, Job, JobStage};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to every
/// target. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(default_level: &str) {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialized: {}", e);
    }
}

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the worker id, the job's batch index and its
/// identifier, so a failed job can be re-run on its own.
#[derive(Debug, Clone)]
pub struct JobLogger {
    worker_id: usize,
    index: usize,
    identifier: String,
}

impl JobLogger {
    pub fn new(worker_id: usize, job: &Job) -> Self {
        Self {
            worker_id,
            index: job.index,
            identifier: job.identifier.clone(),
        }
    }

    pub fn log_start(&self) {
        info!(
            worker_id = self.worker_id,
            job = self.index,
            identifier = %self.identifier,
            "Job started"
        );
    }

    pub fn log_stage(&self, stage: JobStage, message: &str) {
        info!(
            worker_id = self.worker_id,
            job = self.index,
            identifier = %self.identifier,
            stage = %stage,
            "{}", message
        );
    }

    pub fn log_warning(&self, stage: JobStage, message: &str) {
        warn!(
            worker_id = self.worker_id,
            job = self.index,
            identifier = %self.identifier,
            stage = %stage,
            "{}", message
        );
    }

    pub fn log_skipped(&self, stage: JobStage, reason: &str) {
        info!(
            worker_id = self.worker_id,
            job = self.index,
            identifier = %self.identifier,
            stage = %stage,
            reason,
            "Job skipped"
        );
    }

    pub fn log_failure(&self, stage: JobStage, reason: &FailureReason) {
        error!(
            worker_id = self.worker_id,
            job = self.index,
            identifier = %self.identifier,
            stage = %stage,
            reason = reason.kind(),
            "Job failed: {}", reason
        );
    }

    pub fn log_completion(&self, artifacts: usize) {
        info!(
            worker_id = self.worker_id,
            job = self.index,
            identifier = %self.identifier,
            artifacts,
            "Job completed"
        );
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            worker_id = self.worker_id,
            job = self.index,
            identifier = %self.identifier
        )
    }
}
