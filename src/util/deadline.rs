//! Deadline - cooperative cancellation carried through every run.
//!
//! A `Deadline` couples a wall-clock expiry with a `CancellationToken`.
//! Adapters and actions receive one, suspend only at I/O, and abort pending
//! work when either the clock runs out or the run is cancelled. Child
//! deadlines never outlive their parent.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{AutoPrError, Result};

/// Wall-clock deadline plus cooperative cancellation.
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Instant,
    token: CancellationToken,
}

impl Deadline {
    /// Deadline `timeout` from now with a fresh cancellation token.
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
            token: CancellationToken::new(),
        }
    }

    /// Child deadline: `min(remaining, timeout)` and a child token, so
    /// cancelling the parent cancels every child.
    pub fn child(&self, timeout: Duration) -> Self {
        let effective = self.remaining().min(timeout);
        Self {
            expires_at: Instant::now() + effective,
            token: self.token.child_token(),
        }
    }

    /// Time left; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero() || self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast if the deadline has passed or the run was cancelled.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(AutoPrError::RunCancelled {
                run_id: operation.to_string(),
            });
        }
        if self.remaining().is_zero() {
            return Err(AutoPrError::DeadlineExceeded {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Run a future under this deadline. Expiry yields `DeadlineExceeded`,
    /// cancellation yields `RunCancelled`; in both cases the future is
    /// dropped, aborting pending I/O.
    pub async fn bound<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        self.check(operation)?;
        tokio::select! {
            _ = self.token.cancelled() => Err(AutoPrError::RunCancelled {
                run_id: operation.to_string(),
            }),
            out = tokio::time::timeout(self.remaining(), fut) => match out {
                Ok(result) => result,
                Err(_) => Err(AutoPrError::DeadlineExceeded {
                    operation: operation.to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_counts_down() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert!(deadline.remaining() <= Duration::from_secs(10));
        assert!(deadline.remaining() > Duration::from_secs(9));
        assert!(!deadline.is_expired());
    }

    #[test]
    fn test_zero_deadline_is_immediately_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert!(deadline.check("op").is_err());
    }

    #[test]
    fn test_child_never_exceeds_parent() {
        let parent = Deadline::after(Duration::from_millis(50));
        let child = parent.child(Duration::from_secs(60));
        assert!(child.remaining() <= Duration::from_millis(50));
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Deadline::after(Duration::from_secs(10));
        let child = parent.child(Duration::from_secs(5));
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.is_expired());
    }

    #[tokio::test]
    async fn test_bound_times_out() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let result: Result<()> = deadline
            .bound("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.code(), "APR-032");
    }

    #[tokio::test]
    async fn test_bound_passes_through_fast_ops() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let result = deadline.bound("fast", async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_bound_zero_deadline_no_side_effects() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let ran = AtomicBool::new(false);
        let deadline = Deadline::after(Duration::ZERO);
        let result: Result<()> = deadline
            .bound("op", async {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_bound_cancelled() {
        let deadline = Deadline::after(Duration::from_secs(10));
        deadline.cancel();
        let result: Result<()> = deadline.bound("op", async { Ok(()) }).await;
        assert_eq!(result.unwrap_err().code(), "APR-031");
    }
}
