//! Rate Limiting with Token Bucket Algorithm
//!
//! One bucket per `(service, identifier)`; tokens refill at a steady rate up
//! to the burst capacity. Exhaustion yields `RateLimited`; whether the
//! caller then waits with backoff or surfaces is decided by the action's
//! idempotency class in the retry layer, not here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{AutoPrError, Result};

/// Configuration for rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens refilled per second
    pub refill_per_sec: f64,
    /// Maximum burst capacity (tokens)
    pub capacity: u32,
    /// Maximum time to wait for a token in `acquire`
    pub max_wait: Duration,
}

impl RateLimiterConfig {
    pub fn new(refill_per_sec: f64, capacity: u32) -> Self {
        Self {
            refill_per_sec,
            capacity,
            max_wait: Duration::from_secs(30),
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            refill_per_sec: 10.0,
            capacity: 20,
            max_wait: Duration::from_secs(30),
        }
    }
}

/// Token-bucket rate limiter for one `(service, identifier)` pair.
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    /// Available tokens (scaled by 1000 for precision)
    tokens: AtomicU64,
    /// Last refill time in milliseconds since UNIX epoch
    last_refill: AtomicU64,
}

impl RateLimiter {
    const SCALE: u64 = 1000; // Token precision scale

    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        let tokens = (config.capacity as u64) * Self::SCALE;
        Self {
            name: name.into(),
            config,
            tokens: AtomicU64::new(tokens),
            last_refill: AtomicU64::new(Self::current_time_millis()),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, RateLimiterConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current available tokens (approximate)
    pub fn available_tokens(&self) -> f64 {
        self.refill_tokens();
        (self.tokens.load(Ordering::SeqCst) as f64) / (Self::SCALE as f64)
    }

    /// Try to acquire a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_tokens(1)
    }

    /// Try to acquire multiple tokens without waiting.
    pub fn try_acquire_tokens(&self, count: u32) -> bool {
        self.refill_tokens();

        let required = (count as u64) * Self::SCALE;
        let mut current = self.tokens.load(Ordering::SeqCst);

        loop {
            if current < required {
                return false;
            }

            match self.tokens.compare_exchange_weak(
                current,
                current - required,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(new) => current = new,
            }
        }
    }

    /// Acquire a token, waiting up to `max_wait`.
    pub async fn acquire(&self) -> Result<()> {
        self.acquire_tokens(1).await
    }

    /// Acquire multiple tokens, waiting up to `max_wait`.
    pub async fn acquire_tokens(&self, count: u32) -> Result<()> {
        let start = std::time::Instant::now();

        loop {
            if self.try_acquire_tokens(count) {
                return Ok(());
            }

            if start.elapsed() >= self.config.max_wait {
                return Err(AutoPrError::RateLimited {
                    service: self.name.clone(),
                    reason: format!(
                        "waited {}ms for {} tokens",
                        self.config.max_wait.as_millis(),
                        count
                    ),
                });
            }

            // Sleep roughly the time one token takes to refill, capped
            let tokens_per_ms = self.config.refill_per_sec / 1000.0;
            let wait_ms = ((count as f64) / tokens_per_ms).ceil() as u64;
            let sleep_time = Duration::from_millis(wait_ms.clamp(1, 100));
            tokio::time::sleep(sleep_time).await;
        }
    }

    /// Refill tokens based on elapsed time
    fn refill_tokens(&self) {
        let now = Self::current_time_millis();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_ms = now.saturating_sub(last);

        if elapsed_ms == 0 {
            return;
        }

        let tokens_to_add = (elapsed_ms as f64 * self.config.refill_per_sec / 1000.0
            * Self::SCALE as f64) as u64;

        if tokens_to_add == 0 {
            return;
        }

        if self
            .last_refill
            .compare_exchange_weak(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let max_tokens = (self.config.capacity as u64) * Self::SCALE;
            let mut current = self.tokens.load(Ordering::SeqCst);

            loop {
                let new_tokens = (current + tokens_to_add).min(max_tokens);
                if new_tokens == current {
                    break;
                }

                match self.tokens.compare_exchange_weak(
                    current,
                    new_tokens,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(new) => current = new,
                }
            }
        }
    }

    /// Reset the rate limiter to full capacity
    pub fn reset(&self) {
        let max_tokens = (self.config.capacity as u64) * Self::SCALE;
        self.tokens.store(max_tokens, Ordering::SeqCst);
        self.last_refill
            .store(Self::current_time_millis(), Ordering::SeqCst);
    }

    fn current_time_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("available_tokens", &self.available_tokens())
            .field("refill_per_sec", &self.config.refill_per_sec)
            .field("capacity", &self.config.capacity)
            .finish()
    }
}
