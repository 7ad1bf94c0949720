//! Per-job outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::fetch::FetchFailure;
use crate::job::{JobStage, VideoId};

/// Reasons a job is skipped without counting as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No manifest file exists for the resolved id
    ManifestMissing,
    /// The manifest exists but lists no clips
    ManifestEmpty,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ManifestMissing => "manifest_missing",
            SkipReason::ManifestEmpty => "manifest_empty",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons a job fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    DownloadExhausted { attempts: u32, last_error: String },
    ManifestInvalid { message: String },
    EngineFailure { message: String },
    SegmentCountMismatch { expected: usize, produced: usize },
    IoFailure { message: String },
}

impl FailureReason {
    /// Short machine-readable tag, used as a log field and metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::DownloadExhausted { .. } => "download_exhausted",
            FailureReason::ManifestInvalid { .. } => "manifest_invalid",
            FailureReason::EngineFailure { .. } => "engine_failure",
            FailureReason::SegmentCountMismatch { .. } => "segment_count_mismatch",
            FailureReason::IoFailure { .. } => "io_failure",
        }
    }
}

impl From<FetchFailure> for FailureReason {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::DownloadExhausted {
                attempts,
                last_error,
            } => FailureReason::DownloadExhausted {
                attempts,
                last_error,
            },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::DownloadExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "download exhausted after {} attempt(s): {}",
                attempts, last_error
            ),
            FailureReason::ManifestInvalid { message } => {
                write!(f, "invalid manifest: {}", message)
            }
            FailureReason::EngineFailure { message } => write!(f, "engine failure: {}", message),
            FailureReason::SegmentCountMismatch { expected, produced } => write!(
                f,
                "segment count mismatch: expected {} segment(s), produced {}",
                expected, produced
            ),
            FailureReason::IoFailure { message } => write!(f, "I/O failure: {}", message),
        }
    }
}

/// Terminal classification of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { artifacts: Vec<PathBuf> },
    Skipped { reason: SkipReason },
    Failed { reason: FailureReason },
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed { .. } => "completed",
            JobOutcome::Skipped { .. } => "skipped",
            JobOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        match self {
            JobOutcome::Completed { artifacts } => artifacts,
            _ => &[],
        }
    }
}

/// One job's outcome plus the context needed to re-run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub index: usize,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_id: Option<VideoId>,
    /// Stage the job was in when it reached its outcome
    pub stage: JobStage,
    pub outcome: JobOutcome,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        let outcome = JobOutcome::Skipped {
            reason: SkipReason::ManifestMissing,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "manifest_missing");

        let failed = JobOutcome::Failed {
            reason: FailureReason::SegmentCountMismatch {
                expected: 2,
                produced: 1,
            },
        };
        let back: JobOutcome =
            serde_json::from_str(&serde_json::to_string(&failed).unwrap()).unwrap();
        assert_eq!(back, failed);
    }

    #[test]
    fn test_fetch_failure_conversion() {
        let reason: FailureReason = FetchFailure::DownloadExhausted {
            attempts: 3,
            last_error: "timeout".to_string(),
        }
        .into();
        assert_eq!(reason.kind(), "download_exhausted");
        assert_eq!(
            reason.to_string(),
            "download exhausted after 3 attempt(s): timeout"
        );
    }
}
