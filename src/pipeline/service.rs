//! Per-target resilience pipeline.
//!
//! ```text
//! execute(call)
//!     → RetryExecutor (idempotent calls, when enabled)
//!         → CircuitBreaker
//!             → TimeoutGuard
//!                 → Transport::send
//!     → fallback (once, after the final failure or a denial)
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{FallbackKind, RetryConfig, ServiceConfig};
use crate::error::GatewayResult;
use crate::observability::metrics;
use crate::pipeline::call::ServiceCallSpec;
use crate::pipeline::transport::Transport;
use crate::resilience::{BreakerSettings, BreakerSnapshot, CircuitBreaker, RetryExecutor, RetryPolicy};

/// Retry behaviour, swapped as a unit on reload.
#[derive(Debug, Clone)]
struct RetrySettings {
    policy: Option<RetryPolicy>,
    retry_non_idempotent: bool,
}

impl RetrySettings {
    fn from_config(config: &RetryConfig) -> Self {
        Self {
            policy: config.enabled.then(|| RetryPolicy::from_config(config)),
            retry_non_idempotent: config.retry_non_idempotent,
        }
    }
}

/// Admin view of one pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub name: String,
    pub route_prefix: String,
    pub timeout_ms: Option<u64>,
    pub retry_max_attempts: Option<u32>,
    pub fallback: FallbackKind,
    pub breaker: BreakerSnapshot,
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// `payment` → `Payment`.
pub fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Degraded answer substituted for a failed or denied call.
pub fn fallback_value(kind: FallbackKind, target: &str) -> Option<Value> {
    match kind {
        FallbackKind::None => None,
        FallbackKind::PendingPayment => Some(json!({
            "transactionId": format!("fallback_{}", epoch_millis()),
            "status": "pending",
            "message": "Payment service is experiencing issues, payment will be processed later",
            "fallback": true,
        })),
        FallbackKind::PendingShipment => Some(json!({
            "trackingNumber": format!("PENDING-{}", epoch_millis()),
            "estimatedDelivery": "Pending",
            "carrier": "Pending",
            "status": "pending",
            "message": "Shipping service is experiencing issues, shipment will be processed later",
            "fallback": true,
        })),
        FallbackKind::Unavailable => Some(json!({
            "error": format!("{} service is currently unavailable", title_case(target)),
            "status": "unavailable",
            "fallback": true,
        })),
    }
}

/// Breaker, timeout and retry policy for one downstream target.
pub struct Pipeline {
    name: String,
    route_prefix: String,
    fallback: FallbackKind,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker<Value>,
    retry: ArcSwap<RetrySettings>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, config: &ServiceConfig, transport: Arc<dyn Transport>) -> Self {
        let name = name.into();
        let mut breaker = CircuitBreaker::new(
            name.clone(),
            BreakerSettings::from_config(&config.breaker, config.timeout()),
        );
        if config.fallback != FallbackKind::None {
            let (kind, target) = (config.fallback, name.clone());
            breaker = breaker.with_fallback(move |_| fallback_value(kind, &target).unwrap_or(Value::Null));
        }

        Self {
            route_prefix: config.route_prefix.clone(),
            fallback: config.fallback,
            transport,
            breaker,
            retry: ArcSwap::from_pointee(RetrySettings::from_config(&config.retry)),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    pub fn breaker(&self) -> &CircuitBreaker<Value> {
        &self.breaker
    }

    /// Swap timeout, thresholds and retry policy. Breaker state survives.
    pub fn apply(&self, config: &ServiceConfig) {
        self.breaker
            .update_settings(BreakerSettings::from_config(&config.breaker, config.timeout()));
        self.retry.store(Arc::new(RetrySettings::from_config(&config.retry)));
        if config.fallback != self.fallback || config.route_prefix != self.route_prefix {
            tracing::warn!(target_service = %self.name, "Fallback and route changes take effect after restart");
        }
    }

    /// Run `call` through retry, breaker and timeout; apply the fallback last.
    pub async fn execute(&self, call: &ServiceCallSpec, cancel: &CancellationToken) -> GatewayResult<Value> {
        let retry = self.retry.load_full();
        let policy = retry
            .policy
            .as_ref()
            .filter(|_| call.idempotent || retry.retry_non_idempotent);

        let result = match policy {
            Some(policy) => {
                let (name, backoff) = (self.name.clone(), policy.clone());
                let executor = RetryExecutor::new(policy.clone()).on_retry(move |error, attempt| {
                    metrics::record_retry(&name);
                    tracing::warn!(
                        target_service = %name,
                        attempt,
                        delay = ?backoff.delay_for(attempt),
                        error = %error,
                        "Retrying downstream call"
                    );
                });
                executor.execute(|_| self.attempt(call, cancel)).await
            }
            None => self.attempt(call, cancel).await,
        };

        result.or_else(|err| self.breaker.recover(err))
    }

    async fn attempt(&self, call: &ServiceCallSpec, cancel: &CancellationToken) -> GatewayResult<Value> {
        self.breaker
            .call(cancel, |token| self.transport.send(call, token))
            .await
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let settings = self.breaker.settings();
        let retry = self.retry.load();
        PipelineSnapshot {
            name: self.name.clone(),
            route_prefix: self.route_prefix.clone(),
            timeout_ms: settings.timeout.map(|t| t.as_millis() as u64),
            retry_max_attempts: retry.policy.as_ref().map(|p| p.max_attempts),
            fallback: self.fallback,
            breaker: self.breaker.snapshot(),
        }
    }
}

/// Whether an answer is a substituted fallback rather than a real result.
pub fn is_fallback(value: &Value) -> bool {
    value.get("fallback").and_then(Value::as_bool).unwrap_or(false)
}
