//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Gateway-wide timeouts.
    pub timeouts: TimeoutConfig,

    /// Per-caller rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Downstream services keyed by target identifier.
    pub services: ServicesConfig,

    /// Aggregate health endpoint settings.
    pub health: HealthConfig,

    /// Order workflow settings.
    pub orchestration: OrchestrationConfig,

    /// Where collaborator calls are sent.
    pub collaborators: CollaboratorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Timeout configuration for the gateway surface.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outer request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Window length in seconds, anchored at the first request of a window.
    pub window_secs: u64,

    /// Maximum requests per caller per window.
    pub max_requests: u32,

    /// How often expired windows are swept, in seconds.
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            max_requests: 100,
            sweep_interval_secs: 60,
        }
    }
}

/// Map of target identifier -> service settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct ServicesConfig(pub BTreeMap<String, ServiceConfig>);

impl ServicesConfig {
    pub fn get(&self, name: &str) -> Option<&ServiceConfig> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServiceConfig)> {
        self.0.iter()
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ServiceConfig> {
        self.0.get_mut(name)
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            "payment".to_string(),
            ServiceConfig::new("http://localhost:3001", "/api/payments", FallbackKind::PendingPayment),
        );
        services.insert(
            "inventory".to_string(),
            ServiceConfig::new("http://localhost:3002", "/api/inventory", FallbackKind::None),
        );
        services.insert(
            "shipping".to_string(),
            ServiceConfig::new("http://localhost:3003", "/api/shipping", FallbackKind::PendingShipment),
        );
        Self(services)
    }
}

/// One downstream target and the pipeline guarding it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the collaborator (e.g., "http://localhost:3001").
    pub base_url: String,

    /// Gateway path prefix proxied to this service.
    pub route_prefix: String,

    /// Path probed by `GET /health`.
    pub health_path: String,

    /// Per-call timeout enforced inside the breaker, in milliseconds. 0 disables it.
    pub timeout_ms: u64,

    pub breaker: BreakerConfig,

    pub retry: RetryConfig,

    /// Substitute produced when the breaker denies a call or the call fails.
    pub fallback: FallbackKind,
}

impl ServiceConfig {
    pub fn new(base_url: &str, route_prefix: &str, fallback: FallbackKind) -> Self {
        Self {
            base_url: base_url.to_string(),
            route_prefix: route_prefix.to_string(),
            fallback,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            route_prefix: "/".to_string(),
            health_path: "/health".to_string(),
            timeout_ms: 3000,
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            fallback: FallbackKind::None,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure percentage over the rolling window that trips the breaker.
    pub error_threshold_percentage: f64,

    /// Time spent OPEN before a probe is allowed, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Length of the rolling statistics window, in milliseconds.
    pub rolling_window_ms: u64,

    /// Number of buckets the rolling window is split into.
    pub rolling_buckets: u32,

    /// Minimum number of samples in the window before the ratio is evaluated.
    pub volume_threshold: u32,
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percentage: 50.0,
            reset_timeout_ms: 30_000,
            rolling_window_ms: 10_000,
            rolling_buckets: 10,
            volume_threshold: 5,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, first one included.
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    pub min_delay_ms: u64,

    /// Upper bound for any delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    pub multiplier: f64,

    /// Also retry calls that are not idempotent (POST etc).
    pub retry_non_idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            min_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
            retry_non_idempotent: false,
        }
    }
}

/// Fallback result shapes a pipeline can substitute.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    /// Surface the error.
    #[default]
    None,
    /// `{transactionId, status: "pending", message}`.
    PendingPayment,
    /// `{trackingNumber: "PENDING-..", estimatedDelivery: "Pending", carrier: "Pending", message}`.
    PendingShipment,
    /// `{error: "<Service> service is currently unavailable", status: "unavailable"}`.
    Unavailable,
}

/// Aggregate health endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Independent timeout for each service probe, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { probe_timeout_ms: 2000 }
    }
}

/// Order workflow configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub inventory_service: String,
    pub payment_service: String,
    pub shipping_service: String,

    /// Restore stock after a failure that may follow the decrement: a
    /// terminal shipment failure, or an inventory update that timed out or
    /// failed without a clear answer.
    ///
    /// Compensation calls `POST /api/inventory/restore {orderId, items}`,
    /// which must put back only what that `orderId` reserved and be a no-op
    /// for unknown orders. Collaborators without that endpoint answer 404
    /// and the abort reports `compensated: false`.
    pub compensate_on_failure: bool,

    /// The inventory collaborator deduplicates update and restore per
    /// `orderId`, so both may be retried. Off by default: a retried update
    /// against a collaborator that committed but answered late would
    /// decrement stock again. Always on for in-memory collaborators.
    pub idempotent_updates: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            inventory_service: "inventory".to_string(),
            payment_service: "payment".to_string(),
            shipping_service: "shipping".to_string(),
            compensate_on_failure: true,
            idempotent_updates: false,
        }
    }
}

/// Default cap on in-memory collaborator records.
pub const DEFAULT_RETENTION: usize = 10_000;

/// How collaborator calls are dispatched.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorMode {
    /// Over HTTP to each service's `base_url`.
    #[default]
    Http,
    /// To in-process collaborators seeded from `catalog`.
    ///
    /// State lives only in this process and is lost on restart. Order,
    /// payment and shipment records are kept up to `retention` entries each,
    /// oldest evicted first.
    InMemory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub mode: CollaboratorMode,

    /// Initial stock for in-memory collaborators.
    pub catalog: Vec<CatalogItem>,

    /// Records kept per in-memory collaborator before the oldest are evicted.
    pub retention: usize,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            mode: CollaboratorMode::Http,
            catalog: vec![
                CatalogItem::new("prod-001", "Laptop", 10, 1200.0),
                CatalogItem::new("prod-002", "Smartphone", 15, 800.0),
                CatalogItem::new("prod-003", "Headphones", 20, 100.0),
            ],
            retention: DEFAULT_RETENTION,
        }
    }
}

/// A product seeded into the in-memory inventory.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

impl CatalogItem {
    pub fn new(id: &str, name: &str, quantity: u32, price: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            quantity,
            price,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoints configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Expose `/admin/*` on the gateway listener.
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_services() {
        let config = GatewayConfig::default();
        let payment = config.services.get("payment").unwrap();
        assert_eq!(payment.base_url, "http://localhost:3001");
        assert_eq!(payment.fallback, FallbackKind::PendingPayment);
        assert_eq!(payment.timeout(), Some(Duration::from_millis(3000)));
        assert_eq!(config.services.get("inventory").unwrap().fallback, FallbackKind::None);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml() {
        let raw = r#"
            [rate_limit]
            max_requests = 5

            [services.payment]
            base_url = "http://payments.internal:9000"
            route_prefix = "/api/payments"
            fallback = "pending_payment"

            [services.payment.breaker]
            volume_threshold = 2
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_secs, 60);

        // An explicit services table replaces the default set.
        assert!(config.services.get("inventory").is_none());
        let payment = config.services.get("payment").unwrap();
        assert_eq!(payment.breaker.volume_threshold, 2);
        assert_eq!(payment.breaker.reset_timeout_ms, 30_000);
        assert_eq!(payment.timeout_ms, 3000);
    }

    #[test]
    fn test_zero_timeout_disables_guard() {
        let service = ServiceConfig { timeout_ms: 0, ..Default::default() };
        assert!(service.timeout().is_none());
    }
}
