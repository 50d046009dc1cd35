//! Resilience patterns for fault-tolerant outbound calls
//!
//! This module provides:
//! - [`retry`]: Retry with exponential backoff and full jitter
//! - [`circuit_breaker`]: Circuit breaker pattern per endpoint
//! - [`rate_limiter`]: Rate limiting with token bucket
//! - [`gate`]: The composed per-call wrapper and process-wide registries
//! - [`metrics`]: Per-endpoint counters and latency percentiles

pub mod circuit_breaker;
pub mod gate;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use gate::ServiceGates;
pub use metrics::{LatencyStats, Metrics, MetricsSnapshot};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{IdempotencyClass, RetryConfig, RetryPolicy};
