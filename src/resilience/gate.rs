//! Call gate: the composed resilience wrapper around outbound calls.
//!
//! Every adapter call made on behalf of a step goes through
//! [`ServiceGates::call`], which composes, in order:
//!
//! 1. token-bucket rate limiting per `(service, identifier)`
//! 2. circuit breaking per `(endpoint, credential)`
//! 3. retry with full-jitter backoff (gated on error kind × idempotency
//!    class)
//! 4. the step deadline (expiry cancels pending I/O)
//!
//! Breakers, limiters and metrics are process-wide and shared by all runs.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::config::ResilienceConfig;
use crate::error::{AutoPrError, ErrorKind, Result};
use crate::util::Deadline;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::metrics::{Metrics, MetricsSnapshot};
use super::rate_limiter::{RateLimiter, RateLimiterConfig};
use super::retry::{IdempotencyClass, RetryConfig, RetryPolicy};

/// Process-wide registry of resilience state: breakers keyed by
/// `(endpoint, credential)`, limiters by `(service, identifier)`, metrics
/// by endpoint.
pub struct ServiceGates {
    breaker_config: CircuitBreakerConfig,
    limiter_config: RateLimiterConfig,
    retry_policy: RetryPolicy,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    limiters: DashMap<String, Arc<RateLimiter>>,
    metrics: DashMap<String, Arc<Metrics>>,
}

impl ServiceGates {
    pub fn new(config: &ResilienceConfig) -> Self {
        let breaker_config = CircuitBreakerConfig::default()
            .with_fail_max(config.fail_max)
            .with_reset_after(std::time::Duration::from_secs(config.reset_after_secs));
        let limiter_config = RateLimiterConfig::new(config.refill_per_sec, config.bucket_capacity);
        let retry_policy = RetryPolicy::new(
            RetryConfig::default()
                .with_max_attempts(config.max_attempts)
                .with_max_elapsed(std::time::Duration::from_secs(config.max_elapsed_secs)),
        );
        Self {
            breaker_config,
            limiter_config,
            retry_policy,
            breakers: DashMap::new(),
            limiters: DashMap::new(),
            metrics: DashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&ResilienceConfig::default())
    }

    /// Breaker for `(endpoint, credential)`; created on first use.
    ///
    /// `credential` is a label (a fingerprint of the configured token),
    /// never the secret value itself. Keying per credential keeps one
    /// revoked token from tripping the breaker for every other credential
    /// calling the same endpoint.
    pub fn breaker(&self, endpoint: &str, credential: &str) -> Arc<CircuitBreaker> {
        let key = format!("{}:{}", endpoint, credential);
        self.breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.breaker_config.clone())))
            .clone()
    }

    /// Limiter for `(service, identifier)`; created on first use.
    pub fn limiter(&self, service: &str, identifier: &str) -> Arc<RateLimiter> {
        let key = format!("{}:{}", service, identifier);
        self.limiters
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RateLimiter::new(key, self.limiter_config.clone())))
            .clone()
    }

    /// Metrics collector for an endpoint; created on first use.
    pub fn metrics(&self, endpoint: &str) -> Arc<Metrics> {
        self.metrics
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Metrics::new(endpoint)))
            .clone()
    }

    /// Snapshot all endpoint metrics (for run summaries).
    pub fn metrics_snapshots(&self) -> Vec<MetricsSnapshot> {
        let mut snaps: Vec<MetricsSnapshot> =
            self.metrics.iter().map(|m| m.value().snapshot()).collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }

    /// Execute an outbound call with the full resilience stack.
    ///
    /// `endpoint` keys the metrics; the breaker is keyed
    /// `(endpoint, credential)` and the rate-limit bucket
    /// `(endpoint, identifier)` (usually the repo).
    pub async fn call<T, F, Fut>(
        &self,
        endpoint: &str,
        credential: &str,
        identifier: &str,
        class: IdempotencyClass,
        deadline: &Deadline,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let breaker = self.breaker(endpoint, credential);
        let limiter = self.limiter(endpoint, identifier);
        let metrics = self.metrics(endpoint);
        let start = Instant::now();

        let op = &op;
        let result = self
            .retry_policy
            .execute(class, |attempt| {
                let breaker = Arc::clone(&breaker);
                let limiter = Arc::clone(&limiter);
                let metrics = Arc::clone(&metrics);
                let deadline = deadline.clone();
                async move {
                    if attempt > 0 {
                        metrics.record_retry();
                    }
                    match class {
                        IdempotencyClass::Pure | IdempotencyClass::Read => {
                            limiter.acquire().await?
                        }
                        IdempotencyClass::Effectful => {
                            if !limiter.try_acquire() {
                                return Err(AutoPrError::RateLimited {
                                    service: endpoint.to_string(),
                                    reason: "bucket exhausted".to_string(),
                                });
                            }
                        }
                    }
                    breaker
                        .execute(|| deadline.bound(endpoint, op()))
                        .await
                }
            })
            .await;

        let elapsed = start.elapsed();
        match &result {
            Ok(_) => metrics.record_success(elapsed),
            Err(e) => {
                match e.kind() {
                    ErrorKind::CircuitOpen => metrics.record_circuit_trip(),
                    ErrorKind::RateLimited => metrics.record_rate_limit_hit(),
                    _ => {}
                }
                metrics.record_failure(elapsed);
            }
        }
        result
    }
}

impl Default for ServiceGates {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_call_passes_through_success() {
        let gates = ServiceGates::with_defaults();
        let result = gates
            .call("tracker", "default", "default", IdempotencyClass::Read, &deadline(), || async {
                Ok(7)
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(gates.metrics("tracker").snapshot().successes, 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fails_fast() {
        let mut config = ResilienceConfig::default();
        config.max_attempts = 1; // isolate breaker behavior from retries
        let gates = ServiceGates::new(&config);

        for _ in 0..5 {
            let _ = gates
                .call("tracker", "default", "default", IdempotencyClass::Effectful, &deadline(), || async {
                    Err::<(), _>(AutoPrError::Transport {
                        endpoint: "tracker".into(),
                        details: "503".into(),
                    })
                })
                .await;
        }

        let start = Instant::now();
        let result = gates
            .call("tracker", "default", "default", IdempotencyClass::Effectful, &deadline(), || async {
                Ok(())
            })
            .await;
        let elapsed = start.elapsed();

        assert_eq!(result.unwrap_err().code(), "APR-040");
        // Open circuit fails without outbound I/O: well under 10ms
        assert!(elapsed < Duration::from_millis(10), "took {:?}", elapsed);
        assert!(gates.metrics("tracker").snapshot().circuit_trips >= 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failures() {
        let gates = ServiceGates::with_defaults();
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();

        let result = gates
            .call("vcs", "default", "default", IdempotencyClass::Read, &deadline(), move || {
                let a = a.clone();
                async move {
                    if a.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AutoPrError::Transport {
                            endpoint: "vcs".into(),
                            details: "502".into(),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(gates.metrics("vcs").snapshot().retries, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_not_retried() {
        let gates = ServiceGates::with_defaults();
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();

        let result: Result<()> = gates
            .call("vcs", "default", "default", IdempotencyClass::Read, &deadline(), move || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(AutoPrError::InvalidInput {
                        location: "files".into(),
                        reason: "empty".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_call() {
        let gates = ServiceGates::with_defaults();
        let deadline = Deadline::after(Duration::from_millis(20));

        let result: Result<()> = gates
            .call("vcs", "default", "default", IdempotencyClass::Effectful, &deadline, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Deadline);
    }

    #[tokio::test]
    async fn test_separate_credentials_have_separate_breakers() {
        let mut config = ResilienceConfig::default();
        config.max_attempts = 1;
        let gates = ServiceGates::new(&config);

        // One revoked token trips its own breaker
        for _ in 0..5 {
            let _ = gates
                .call("tracker", "cred-a", "default", IdempotencyClass::Effectful, &deadline(), || async {
                    Err::<(), _>(AutoPrError::Transport {
                        endpoint: "tracker".into(),
                        details: "503".into(),
                    })
                })
                .await;
        }
        let open = gates
            .call("tracker", "cred-a", "default", IdempotencyClass::Effectful, &deadline(), || async {
                Ok(())
            })
            .await;
        assert_eq!(open.unwrap_err().code(), "APR-040");

        // The same endpoint under a different credential is unaffected
        let other = gates
            .call("tracker", "cred-b", "default", IdempotencyClass::Effectful, &deadline(), || async {
                Ok("created")
            })
            .await;
        assert_eq!(other.unwrap(), "created");
    }

    #[tokio::test]
    async fn test_separate_endpoints_have_separate_breakers() {
        let mut config = ResilienceConfig::default();
        config.max_attempts = 1;
        let gates = ServiceGates::new(&config);

        for _ in 0..5 {
            let _ = gates
                .call("tracker", "default", "default", IdempotencyClass::Effectful, &deadline(), || async {
                    Err::<(), _>(AutoPrError::Transport {
                        endpoint: "tracker".into(),
                        details: "500".into(),
                    })
                })
                .await;
        }

        // Other endpoint unaffected
        let result = gates
            .call("chat", "default", "default", IdempotencyClass::Effectful, &deadline(), || async {
                Ok("posted")
            })
            .await;
        assert_eq!(result.unwrap(), "posted");
    }
}
