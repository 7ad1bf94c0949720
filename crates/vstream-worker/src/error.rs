//! Worker error types.
//!
//! Per-job failures never surface as errors: the pipeline folds them into a
//! `FailureReason`, and an engine that fails to initialize becomes a worker
//! status. These errors cover configuration and batch-level plumbing.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker process failed: {0}")]
    WorkerProcess(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn worker_process(msg: impl Into<String>) -> Self {
        Self::WorkerProcess(msg.into())
    }

    /// Errors raised before any job starts because the inputs are unusable.
    pub fn is_fatal_to_batch(&self) -> bool {
        matches!(self, WorkerError::InvalidConfig(_))
    }

    /// Process exit code: 2 for unusable configuration, 1 for anything else
    /// that stopped the batch.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal_to_batch() {
            2
        } else {
            1
        }
    }
}

impl From<validator::ValidationErrors> for WorkerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::InvalidConfig(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(WorkerError::invalid_config("workers must be >= 1").is_fatal_to_batch());
        assert!(!WorkerError::worker_process("spawn failed").is_fatal_to_batch());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!WorkerError::from(io).is_fatal_to_batch());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(WorkerError::invalid_config("urls file not found").exit_code(), 2);
        assert_eq!(WorkerError::worker_process("spawn failed").exit_code(), 1);

        let wrapped = anyhow::Error::from(WorkerError::invalid_config("fps must be >= 1"));
        assert_eq!(
            wrapped.downcast_ref::<WorkerError>().map(WorkerError::exit_code),
            Some(2)
        );
    }
}
