//! Worker and batch reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use uuid::Uuid;

use crate::outcome::{JobOutcome, JobReport};

/// How a worker's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Every assigned job reached an outcome
    Finished,
    /// Stopped early on request; remaining jobs were never started
    Interrupted,
    /// The engine could not be initialized; no job of the shard was attempted
    EngineInitFailed { message: String },
    /// Forcibly terminated after the shutdown grace period, or died without a report
    Terminated,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Finished => "finished",
            WorkerStatus::Interrupted => "interrupted",
            WorkerStatus::EngineInitFailed { .. } => "engine_init_failed",
            WorkerStatus::Terminated => "terminated",
        }
    }
}

/// Everything one worker reports back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    /// Number of jobs in the worker's shard
    pub assigned: usize,
    pub jobs: Vec<JobReport>,
    pub status: WorkerStatus,
}

impl WorkerReport {
    pub fn new(worker_id: usize, assigned: usize) -> Self {
        Self {
            worker_id,
            assigned,
            jobs: Vec::with_capacity(assigned),
            status: WorkerStatus::Finished,
        }
    }

    /// Report for a worker that never produced one of its own.
    pub fn terminated(worker_id: usize, assigned: usize) -> Self {
        Self {
            worker_id,
            assigned,
            jobs: Vec::new(),
            status: WorkerStatus::Terminated,
        }
    }

    /// Report for a worker whose engine failed to initialize.
    pub fn engine_init_failed(worker_id: usize, assigned: usize, message: impl Into<String>) -> Self {
        Self {
            worker_id,
            assigned,
            jobs: Vec::new(),
            status: WorkerStatus::EngineInitFailed {
                message: message.into(),
            },
        }
    }

    /// Jobs of the shard that never reached an outcome.
    pub fn unprocessed(&self) -> usize {
        self.assigned.saturating_sub(self.jobs.len())
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for job in &self.jobs {
            match job.outcome {
                JobOutcome::Completed { ref artifacts } => {
                    counts.completed += 1;
                    counts.artifacts += artifacts.len();
                }
                JobOutcome::Skipped { .. } => counts.skipped += 1,
                JobOutcome::Failed { .. } => counts.failed += 1,
            }
        }
        counts.unprocessed = self.unprocessed();
        if matches!(self.status, WorkerStatus::EngineInitFailed { .. }) {
            counts.worker_failures = 1;
        }
        counts
    }
}

/// Outcome tallies for one worker or a whole batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Jobs never attempted (interruption, termination or worker failure)
    pub unprocessed: usize,
    /// Workers that lost their whole shard to an engine initialization failure
    pub worker_failures: usize,
    pub artifacts: usize,
}

impl AddAssign for OutcomeCounts {
    fn add_assign(&mut self, other: Self) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.unprocessed += other.unprocessed;
        self.worker_failures += other.worker_failures;
        self.artifacts += other.artifacts;
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} failed, {} skipped, {} unprocessed",
            self.completed, self.failed, self.skipped, self.unprocessed
        )
    }
}

/// Final result of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Whether an external interruption was received
    pub interrupted: bool,
    pub workers: Vec<WorkerReport>,
}

impl BatchReport {
    pub fn counts(&self) -> OutcomeCounts {
        let mut total = OutcomeCounts::default();
        for worker in &self.workers {
            total += worker.counts();
        }
        total
    }

    /// All job reports, in worker order.
    pub fn jobs(&self) -> impl Iterator<Item = &JobReport> {
        self.workers.iter().flat_map(|w| w.jobs.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStage;
    use crate::outcome::{FailureReason, SkipReason};
    use std::path::PathBuf;

    fn report(index: usize, outcome: JobOutcome) -> JobReport {
        JobReport {
            index,
            identifier: format!("id-{}", index),
            resolved_id: None,
            stage: JobStage::Persisting,
            outcome,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn test_worker_counts() {
        let mut worker = WorkerReport::new(0, 5);
        worker.jobs.push(report(
            0,
            JobOutcome::Completed {
                artifacts: vec![PathBuf::from("a"), PathBuf::from("b")],
            },
        ));
        worker.jobs.push(report(
            1,
            JobOutcome::Skipped {
                reason: SkipReason::ManifestEmpty,
            },
        ));
        worker.jobs.push(report(
            2,
            JobOutcome::Failed {
                reason: FailureReason::IoFailure {
                    message: "disk full".to_string(),
                },
            },
        ));
        worker.status = WorkerStatus::Interrupted;

        let counts = worker.counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.unprocessed, 2);
        assert_eq!(counts.artifacts, 2);
        assert_eq!(counts.worker_failures, 0);
    }

    #[test]
    fn test_engine_init_failure_is_one_aggregate() {
        let worker = WorkerReport::engine_init_failed(3, 7, "no CUDA device");
        let counts = worker.counts();

        assert_eq!(counts.worker_failures, 1);
        assert_eq!(counts.unprocessed, 7);
        assert_eq!(counts.failed, 0);
    }

    #[test]
    fn test_batch_counts_display() {
        let batch = BatchReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            interrupted: false,
            workers: vec![WorkerReport::new(0, 0), WorkerReport::terminated(1, 2)],
        };

        let counts = batch.counts();
        assert_eq!(counts.unprocessed, 2);
        assert_eq!(
            counts.to_string(),
            "0 completed, 0 failed, 0 skipped, 2 unprocessed"
        );
    }
}
