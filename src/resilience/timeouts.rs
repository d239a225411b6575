//! Timeout enforcement.
//!
//! Races an operation against a deadline. On expiry the operation's
//! cancellation token is cancelled and its future dropped, so a late
//! result can never be applied after the caller has moved on.
//! Timeout errors are distinct from anything the operation returns.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;

/// Deadline for calls to one target.
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    target: String,
    duration: Duration,
}

impl TimeoutGuard {
    pub fn new(target: impl Into<String>, duration: Duration) -> Self {
        Self {
            target: target.into(),
            duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `op` under the deadline.
    ///
    /// `op` receives a child of `parent`; it is cancelled when the deadline
    /// fires (or when `parent` is cancelled by the caller).
    pub async fn run<F, Fut, T>(&self, parent: &CancellationToken, op: F) -> GatewayResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let token = parent.child_token();
        let operation = op(token.clone());

        match tokio::time::timeout(self.duration, operation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                token.cancel();
                metrics::record_timeout(&self.target);
                tracing::warn!(
                    target_service = %self.target,
                    timeout_ms = self.duration.as_millis() as u64,
                    "Call timed out"
                );
                Err(GatewayError::Timeout {
                    target: self.target.clone(),
                    after: self.duration,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_before_slow_operation() {
        let guard = TimeoutGuard::new("inventory", Duration::from_millis(100));
        let start = Instant::now();

        let result: GatewayResult<u32> = guard
            .run(&CancellationToken::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Timeout { ref target, .. }) if target == "inventory"));
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_outcome_passes_through_unchanged() {
        let guard = TimeoutGuard::new("payment", Duration::from_secs(1));

        let ok = guard.run(&CancellationToken::new(), |_| async { Ok("done") }).await;
        assert_eq!(ok.unwrap(), "done");

        let err: GatewayResult<()> = guard
            .run(&CancellationToken::new(), |_| async {
                Err(GatewayError::transport("payment", "connection refused"))
            })
            .await;
        assert!(matches!(err, Err(GatewayError::Downstream { status: None, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_is_discarded_and_token_cancelled() {
        let guard = TimeoutGuard::new("shipping", Duration::from_millis(50));
        let applied = Arc::new(AtomicBool::new(false));
        let observed_cancel = Arc::new(AtomicBool::new(false));

        let a = applied.clone();
        let c = observed_cancel.clone();
        let result: GatewayResult<()> = guard
            .run(&CancellationToken::new(), move |token| async move {
                tokio::spawn(async move {
                    token.cancelled().await;
                    c.store(true, Ordering::SeqCst);
                });
                tokio::time::sleep(Duration::from_millis(200)).await;
                a.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.is_err());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!applied.load(Ordering::SeqCst), "late result must never be applied");
        assert!(observed_cancel.load(Ordering::SeqCst));
    }
}
