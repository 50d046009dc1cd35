//! Retry with exponential backoff and full jitter
//!
//! Retryability is a function of the closed [`ErrorKind`] taxonomy and the
//! action's [`IdempotencyClass`]: pure actions retry freely on transient
//! kinds, reads retry with jittered backoff, effectful actions retry only
//! on `Transport` (and must carry an idempotency key). `CircuitOpen` and
//! all user/config kinds are never retried.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{AutoPrError, ErrorKind, Result};

/// How safely an action can be re-executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyClass {
    /// Deterministic, side-effect free: retry freely
    Pure,
    /// Reads external state: retry with jitter
    Read,
    /// Mutates external state: retry only on transport errors, requires an
    /// idempotency key
    Effectful,
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts including the initial one
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for any single backoff delay
    pub max_delay: Duration,
    /// Total elapsed budget across all attempts
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = elapsed;
        self
    }
}

/// Retry policy executing operations with exponential backoff + full jitter.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Backoff ceiling for a given attempt (0-indexed): `base * 2^attempt`,
    /// capped at `max_delay`. The actual sleep is drawn uniformly from
    /// `[0, ceiling]` (full jitter).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = base.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as f64;
        Duration::from_millis((rand::random::<f64>() * ceiling) as u64)
    }

    /// Whether an error kind is retryable for the given idempotency class.
    pub fn is_retryable(kind: ErrorKind, class: IdempotencyClass) -> bool {
        match class {
            IdempotencyClass::Pure | IdempotencyClass::Read => kind.is_transient(),
            IdempotencyClass::Effectful => kind == ErrorKind::Transport,
        }
    }

    /// Execute an operation with retry logic.
    ///
    /// Stops on the first non-retryable error, when `max_attempts` is
    /// reached, or when the elapsed budget would be exceeded.
    pub async fn execute<F, Fut, T>(&self, class: IdempotencyClass, operation: F) -> Result<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut last_error: Option<AutoPrError> = None;

        for attempt in 0..self.config.max_attempts {
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !Self::is_retryable(e.kind(), class) {
                        return Err(e);
                    }
                    last_error = Some(e);

                    if attempt + 1 < self.config.max_attempts {
                        let delay = self.jittered_delay(attempt);
                        if start.elapsed() + delay >= self.config.max_elapsed {
                            break;
                        }
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let attempts = self.config.max_attempts;
        Err(match last_error {
            Some(e) => AutoPrError::RetryExhausted {
                attempts,
                last_error: e.to_string(),
            },
            None => AutoPrError::Internal {
                details: "retry loop exited without an error".to_string(),
            },
        })
    }
}
