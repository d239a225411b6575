//! Retry logic.
//!
//! # Responsibilities
//! - Run an operation up to `max_attempts` times (attempts numbered from 1)
//! - Wait `clamp(min * multiplier^(attempt-1), min, max)` between attempts
//! - Stop immediately on terminal errors (bail) without spending attempts
//! - Notify a listener with `(error, attempt)` before each wait
//!
//! Errors are terminal when [`GatewayError::is_terminal`] says so or when
//! the policy's bail predicate matches.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::resilience::backoff::calculate_backoff;

/// Marks additional errors as terminal.
pub type BailPredicate = Arc<dyn Fn(&GatewayError) -> bool + Send + Sync>;

/// Called with the failed attempt's error and number before sleeping.
pub type RetryListener = Arc<dyn Fn(&GatewayError, u32) + Send + Sync>;

/// Bounded attempts with exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    bail: Option<BailPredicate>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay,
            multiplier,
            bail: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
        )
    }

    pub fn with_bail<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&GatewayError) -> bool + Send + Sync + 'static,
    {
        self.bail = Some(Arc::new(predicate));
        self
    }

    /// Delay after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.min_delay, self.max_delay, self.multiplier)
    }

    pub fn should_bail(&self, error: &GatewayError) -> bool {
        error.is_terminal() || self.bail.as_ref().is_some_and(|bail| bail(error))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("min_delay", &self.min_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("bail", &self.bail.is_some())
            .finish()
    }
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    on_retry: Option<RetryListener>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, on_retry: None }
    }

    pub fn on_retry<F>(mut self, listener: F) -> Self
    where
        F: Fn(&GatewayError, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(listener));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `op`, passing the attempt number (1-based).
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> GatewayResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if self.policy.should_bail(&error) {
                tracing::debug!(attempt, error = %error, "Terminal error, not retrying");
                return Err(error);
            }
            if attempt >= max_attempts {
                tracing::debug!(attempt, error = %error, "Retry attempts exhausted");
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            if let Some(listener) = &self.on_retry {
                listener(&error, attempt);
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
