//! Circuit Breaker Pattern
//!
//! Prevents cascading failures by failing fast when an endpoint is down.
//!
//! # States
//!
//! - **Closed**: Normal operation, requests go through
//! - **Open**: Too many consecutive failures, requests fail immediately
//! - **Half-Open**: Probing recovery; one success closes, one failure reopens
//!
//! Breakers are keyed per `(endpoint, credential)` in
//! [`ServiceGates`](super::gate::ServiceGates); in the Open state a
//! call fails in microseconds with `CircuitOpen` and no outbound I/O.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::{AutoPrError, ErrorKind, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests flow through
    Closed,
    /// Endpoint down - requests fail immediately
    Open,
    /// Testing recovery - one request allowed through
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub fail_max: u32,
    /// Time to wait in open state before transitioning to half-open
    pub reset_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_max: 5,
            reset_after: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Set consecutive-failure threshold before the circuit opens
    pub fn with_fail_max(mut self, fail_max: u32) -> Self {
        self.fail_max = fail_max;
        self
    }

    /// Set open-state reset window
    pub fn with_reset_after(mut self, reset_after: Duration) -> Self {
        self.reset_after = reset_after;
        self
    }
}

/// Circuit breaker for one `(endpoint, credential)` pair; `endpoint`
/// holds the composed key.
pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    last_failure_time: AtomicU64, // Milliseconds since UNIX epoch
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_time: AtomicU64::new(0),
        }
    }

    /// Create a circuit breaker with default configuration
    pub fn with_defaults(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, CircuitBreakerConfig::default())
    }

    /// Get the current circuit state
    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the endpoint name
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the current consecutive-failure count
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Execute an operation through the circuit breaker.
    ///
    /// Only infrastructure failures (`Transport`, `Timeout`, `Internal`)
    /// count toward opening the circuit: a 4xx-style error means the
    /// endpoint answered, so it resets the consecutive-failure streak.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check_reset_window();

        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => match operation().await {
                Ok(result) => {
                    self.record_success();
                    Ok(result)
                }
                Err(e) => {
                    if Self::counts_as_breaker_failure(&e) {
                        self.record_failure();
                    } else {
                        self.record_success();
                    }
                    Err(e)
                }
            },
            CircuitState::Open => Err(AutoPrError::CircuitOpen {
                endpoint: self.endpoint.clone(),
            }),
        }
    }

    fn counts_as_breaker_failure(err: &AutoPrError) -> bool {
        matches!(
            err.kind(),
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::Internal
        )
    }

    /// Transition Open → HalfOpen once the reset window has passed.
    fn check_reset_window(&self) {
        if self.state() != CircuitState::Open {
            return;
        }
        let last_failure = self.last_failure_time.load(Ordering::SeqCst);
        let now = Self::current_time_millis();
        let elapsed = Duration::from_millis(now.saturating_sub(last_failure));

        if elapsed >= self.config.reset_after {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if *state == CircuitState::Open {
                *state = CircuitState::HalfOpen;
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match *state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                // One success closes the circuit
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        self.last_failure_time
            .store(Self::current_time_millis(), Ordering::SeqCst);

        match *state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.fail_max {
                    *state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                // One failure in half-open reopens the circuit
                *state = CircuitState::Open;
            }
            CircuitState::Open => {
                self.failure_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Reset the circuit breaker to closed state (admin/tests)
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
        self.last_failure_time.store(0, Ordering::SeqCst);
    }

    /// Force the circuit open (admin/tests)
    pub fn force_open(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = CircuitState::Open;
        self.last_failure_time
            .store(Self::current_time_millis(), Ordering::SeqCst);
    }

    #[cfg(test)]
    fn force_half_open(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = CircuitState::HalfOpen;
    }

    fn current_time_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}
