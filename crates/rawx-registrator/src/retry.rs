//! Retry logic with exponential backoff for metadata service calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{is_retryable, MetaError, MetaResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call (default: 3).
    pub max_retries: u32,
    /// Initial backoff in milliseconds (default: 200).
    pub initial_backoff_ms: u64,
    /// Maximum backoff in milliseconds (default: 5000).
    pub max_backoff_ms: u64,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to backoff (default: true).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// Operation succeeded.
    Success(T),
    /// The operation failed permanently or all retries were used.
    Exhausted {
        /// The last error that occurred.
        last_error: MetaError,
        /// Total number of attempts made.
        attempts: u32,
    },
}

impl<T> RetryOutcome<T> {
    /// Converts into a plain result, dropping the attempt count.
    pub fn into_result(self) -> MetaResult<T> {
        match self {
            RetryOutcome::Success(v) => Ok(v),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Executor for retried metadata operations.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new RetryExecutor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total attempts an always-unavailable service receives.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Execute an operation with retry logic.
    ///
    /// Only transient errors are retried; permanent errors return
    /// `Exhausted` after the attempt that produced them.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = MetaResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(e) => {
                    if !is_retryable(&e) || attempt > self.config.max_retries {
                        return RetryOutcome::Exhausted {
                            last_error: e,
                            attempts: attempt,
                        };
                    }
                    let backoff = self.compute_backoff(attempt - 1);
                    tracing::debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "retrying metadata call");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Computes `initial_backoff * backoff_multiplier^attempt`, capped at
    /// `max_backoff`, plus up to 50% jitter when enabled.
    fn compute_backoff(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.config.initial_backoff_ms as f64;
        let max_delay_ms = self.config.max_backoff_ms as f64;

        let computed = base_delay_ms * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = computed.min(max_delay_ms) as u64;

        if self.config.jitter && capped > 1 {
            let jitter_ms = rand::thread_rng().gen_range(0..=capped / 2);
            Duration::from_millis(capped.saturating_add(jitter_ms))
        } else {
            Duration::from_millis(capped)
        }
    }
}
