//! Fetch results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::job::VideoId;

/// Why a fetch gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchFailure {
    /// Every attempt failed or timed out.
    DownloadExhausted { attempts: u32, last_error: String },
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::DownloadExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "download exhausted after {} attempt(s): {}",
                attempts, last_error
            ),
        }
    }
}

/// Result of fetching one remote item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchResult {
    Success {
        local_path: PathBuf,
        resolved_id: VideoId,
        /// Attempts used, including the successful one
        attempts: u32,
    },
    Failure {
        reason: FetchFailure,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    /// Number of downloader invocations this result took.
    pub fn attempts(&self) -> u32 {
        match self {
            FetchResult::Success { attempts, .. } => *attempts,
            FetchResult::Failure {
                reason: FetchFailure::DownloadExhausted { attempts, .. },
            } => *attempts,
        }
    }
}
