//! Pipeline metrics.
//!
//! Counters go through the `metrics` facade; they are no-ops unless the
//! embedding process installs a recorder.

use metrics::counter;

use vstream_models::JobOutcome;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "vstream_jobs_total";
    pub const FETCH_ATTEMPTS_TOTAL: &str = "vstream_fetch_attempts_total";
    pub const CLIPS_WRITTEN_TOTAL: &str = "vstream_clips_written_total";
    pub const WORKER_FAILURES_TOTAL: &str = "vstream_worker_failures_total";
}

/// Record a job's terminal outcome.
pub fn record_job_outcome(outcome: &JobOutcome) {
    let labels = [("outcome", outcome.as_str().to_string())];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
}

/// Record one downloader invocation.
pub fn record_fetch_attempt(success: bool) {
    let result = if success { "success" } else { "failure" };
    let labels = [("result", result.to_string())];
    counter!(names::FETCH_ATTEMPTS_TOTAL, &labels).increment(1);
}

/// Record clips persisted for one job.
pub fn record_clips_written(count: usize) {
    counter!(names::CLIPS_WRITTEN_TOTAL).increment(count as u64);
}

/// Record a worker lost to an engine initialization failure.
pub fn record_worker_failure() {
    counter!(names::WORKER_FAILURES_TOTAL).increment(1);
}
