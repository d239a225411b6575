//! Fault injection for exercising breaker and retry paths.
//!
//! [`FaultyTransport`] decorates any [`Transport`]. It is only constructed
//! by tests and never from configuration.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, GatewayResult};
use crate::pipeline::call::ServiceCallSpec;
use crate::pipeline::transport::Transport;

/// What to break and how often.
#[derive(Debug, Clone, Default)]
pub struct FaultPolicy {
    /// Fail this many calls before letting any through.
    pub fail_first: u32,
    /// Probability in `[0, 1]` of failing any later call.
    pub failure_rate: f64,
    /// Delay added before every call.
    pub latency: Duration,
    /// HTTP status for injected failures; `None` simulates a transport error.
    pub status: Option<u16>,
    pub seed: u64,
    /// Only calls to this target are affected when set.
    pub target: Option<String>,
}

impl FaultPolicy {
    pub fn fail_first(n: u32) -> Self {
        Self {
            fail_first: n,
            ..Default::default()
        }
    }

    pub fn failure_rate(rate: f64, seed: u64) -> Self {
        Self {
            failure_rate: rate,
            seed,
            ..Default::default()
        }
    }

    pub fn latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Transport wrapper that injects failures and latency.
pub struct FaultyTransport {
    inner: Arc<dyn Transport>,
    policy: FaultPolicy,
    calls: AtomicU32,
    injected: AtomicU32,
    rng: Mutex<fastrand::Rng>,
}

impl FaultyTransport {
    pub fn new(inner: Arc<dyn Transport>, policy: FaultPolicy) -> Self {
        let rng = fastrand::Rng::with_seed(policy.seed);
        Self {
            inner,
            policy,
            calls: AtomicU32::new(0),
            injected: AtomicU32::new(0),
            rng: Mutex::new(rng),
        }
    }

    /// Calls that reached this transport for an affected target.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn should_fail(&self, n: u32) -> bool {
        if n <= self.policy.fail_first {
            return true;
        }
        if self.policy.failure_rate <= 0.0 {
            return false;
        }
        let roll = self.rng.lock().unwrap_or_else(PoisonError::into_inner).f64();
        roll < self.policy.failure_rate
    }

    fn fault(&self, call: &ServiceCallSpec) -> GatewayError {
        self.injected.fetch_add(1, Ordering::SeqCst);
        match self.policy.status {
            Some(status) => GatewayError::Downstream {
                target: call.target.clone(),
                status: Some(status),
                message: "injected fault".into(),
                body: None,
            },
            None => GatewayError::transport(&call.target, "injected fault"),
        }
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn send(&self, call: &ServiceCallSpec, cancel: CancellationToken) -> GatewayResult<Value> {
        if self.policy.target.as_ref().is_some_and(|t| t != &call.target) {
            return self.inner.send(call, cancel).await;
        }

        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.policy.latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(GatewayError::transport(&call.target, "request cancelled"));
                }
                _ = tokio::time::sleep(self.policy.latency) => {}
            }
        }

        if self.should_fail(n) {
            return Err(self.fault(call));
        }
        self.inner.send(call, cancel).await
    }
}
