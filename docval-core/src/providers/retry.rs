//! Retry policy for resilient backend operations
//!
//! Configurable retry policies with exponential backoff and jitter. Only
//! errors the adapter marks retryable are retried; attempts are sequential.

use crate::providers::error::BackendError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Initial delay before first retry (milliseconds)
    pub initial_delay_ms: u64,

    /// Maximum delay between retries (milliseconds)
    pub max_delay_ms: u64,

    /// Base for exponential backoff (e.g., 2.0 for doubling)
    pub exponential_base: f64,

    /// Jitter factor (0.0 to 1.0) to randomize delays
    pub jitter_factor: f64,

    /// Whether to honour a server-supplied retry hint
    pub respect_retry_after: bool,

    /// Maximum total time to spend retrying (milliseconds)
    pub timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            exponential_base: 2.0,
            jitter_factor: 0.1,
            respect_retry_after: true,
            timeout_ms: Some(60_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Policy for latency-insensitive batch validation
    pub fn conservative() -> Self {
        Self {
            max_retries: 1,
            initial_delay_ms: 500,
            max_delay_ms: 15_000,
            exponential_base: 3.0,
            jitter_factor: 0.3,
            respect_retry_after: true,
            timeout_ms: Some(20_000),
        }
    }

    /// A policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Calculate the delay for a given retry attempt
    pub fn calculate_delay(&self, attempt: u32, error: &BackendError) -> Duration {
        if self.respect_retry_after {
            if let BackendError::RateLimit {
                retry_after: Some(hint),
            } = error
            {
                return (*hint).min(Duration::from_millis(self.max_delay_ms));
            }
        }

        let base_delay = self.initial_delay_ms as f64 * self.exponential_base.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let delay_with_jitter = if self.jitter_factor > 0.0 && capped_delay > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(delay_with_jitter as u64)
    }

    /// Check if we should retry based on the error and attempt count
    pub fn should_retry(&self, error: &BackendError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

/// Outcome of a retried operation
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    pub result: Result<T, BackendError>,

    /// Number of calls made (initial attempt included)
    pub calls: u32,

    /// Total time spent sleeping between attempts
    pub total_delay: Duration,

    /// Every error encountered, in order
    pub error_history: Vec<BackendError>,
}

impl<T> RetryResult<T> {
    pub fn into_result(self) -> Result<T, BackendError> {
        self.result
    }
}

/// Executor for retry operations
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, T, Fut>(&self, label: &str, mut operation: F) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        let mut total_delay = Duration::ZERO;
        let mut error_history = Vec::new();
        let start_time = Instant::now();

        loop {
            match operation().await {
                Ok(value) => {
                    return RetryResult {
                        result: Ok(value),
                        calls: attempt + 1,
                        total_delay,
                        error_history,
                    };
                }
                Err(error) => {
                    error_history.push(error.clone());

                    if !self.policy.should_retry(&error, attempt) {
                        if error.is_retryable() {
                            warn!(
                                backend = label,
                                attempts = attempt + 1,
                                error = %error,
                                "Retries exhausted"
                            );
                        } else {
                            debug!(
                                backend = label,
                                error = %error,
                                "Permanent error, not retrying"
                            );
                        }
                        return RetryResult {
                            result: Err(error),
                            calls: attempt + 1,
                            total_delay,
                            error_history,
                        };
                    }

                    if let Some(timeout_ms) = self.policy.timeout_ms {
                        if start_time.elapsed() > Duration::from_millis(timeout_ms) {
                            warn!(backend = label, "Retry window elapsed");
                            return RetryResult {
                                result: Err(BackendError::Timeout),
                                calls: attempt + 1,
                                total_delay,
                                error_history,
                            };
                        }
                    }

                    let delay = self.policy.calculate_delay(attempt, &error);
                    debug!(
                        backend = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );
                    total_delay += delay;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
