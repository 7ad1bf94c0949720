//! Retry utilities with fixed or exponential backoff.
//!
//! Used by the fetch adapter to ride out flaky downloads. The delay is only
//! slept between attempts, never after the final one.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use validator::Validate;

/// Default attempt cap for a fetch.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default ceiling for exponential backoff.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// How the delay grows between attempts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay after every failed attempt
    #[default]
    Fixed,
    /// Doubling delay capped at `max_delay`, with full jitter
    Exponential,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    #[validate(range(min = 1, message = "at least one attempt is required"))]
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    /// Fixed delay, or the first delay of the exponential schedule.
    #[serde(with = "vstream_models::duration_secs")]
    pub base_delay: Duration,
    /// Upper bound for exponential delays.
    #[serde(with = "vstream_models::duration_secs")]
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffKind::Fixed,
            base_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    /// Upper bound of the delay after the given failed attempt (1-based).
    pub fn delay_ceiling(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.base_delay
                    .saturating_mul(2u32.pow(exponent))
                    .min(self.max_delay)
            }
        }
    }

    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let ceiling = self.delay_ceiling(attempt);
        match self.backoff {
            BackoffKind::Fixed => ceiling,
            BackoffKind::Exponential => {
                let ceiling_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
                Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
            }
        }
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded on attempt `attempts`.
    Success { value: T, attempts: u32 },
    /// Operation failed on every attempt; `error` is the last one.
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. } | RetryResult::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Execute an async operation until it succeeds or the attempt cap is hit.
///
/// The closure receives the 1-based attempt number.
///
/// # Example
/// ```ignore
/// let policy = RetryPolicy::new("fetch").with_max_attempts(3);
/// let result = retry_async(&policy, |attempt| async move {
///     downloader.download(id, dir).await
/// }).await;
/// ```
pub async fn retry_async<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = %policy.operation_name,
                    attempt,
                    max_attempts,
                    "Attempt failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(
                    operation = %policy.operation_name,
                    attempts = attempt,
                    "Giving up: {}",
                    e
                );
                return RetryResult::Failed {
                    error: e,
                    attempts: attempt,
                };
            }
        }
    }
}
