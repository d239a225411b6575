//! One pipeline per downstream target, built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::pipeline::service::{Pipeline, PipelineSnapshot};
use crate::pipeline::transport::Transport;

/// Shared lookup of pipelines by target id and by route prefix.
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Arc<Pipeline>>,
    transport: Arc<dyn Transport>,
}

impl PipelineRegistry {
    pub fn from_config(config: &GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        let pipelines = config
            .services
            .iter()
            .map(|(name, service)| {
                let pipeline = Pipeline::new(name.clone(), service, transport.clone());
                (name.clone(), Arc::new(pipeline))
            })
            .collect();
        Self { pipelines, transport }
    }

    pub fn get(&self, target: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.get(target).cloned()
    }

    /// Pipeline whose route prefix is the longest match for `path`.
    pub fn route(&self, path: &str) -> Option<Arc<Pipeline>> {
        self.pipelines
            .values()
            .filter(|p| prefix_matches(p.route_prefix(), path))
            .max_by_key(|p| p.route_prefix().len())
            .cloned()
    }

    /// Transport shared by every pipeline; health probes use it directly.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn snapshot(&self) -> Vec<PipelineSnapshot> {
        self.pipelines.values().map(|p| p.snapshot()).collect()
    }

    /// Push reloaded settings into existing pipelines.
    pub fn apply(&self, config: &GatewayConfig) {
        for (name, service) in config.services.iter() {
            match self.pipelines.get(name) {
                Some(pipeline) => pipeline.apply(service),
                None => tracing::warn!(target_service = %name, "New service requires a restart"),
            }
        }
        for name in self.pipelines.keys() {
            if config.services.get(name).is_none() {
                tracing::warn!(target_service = %name, "Removed service stays active until restart");
            }
        }
    }
}

/// `/api/payments` matches `/api/payments` and `/api/payments/..`, not `/api/paymentsx`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') || prefix.ends_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackKind, ServiceConfig};
    use crate::error::GatewayResult;
    use crate::pipeline::call::ServiceCallSpec;
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    struct Null;

    #[async_trait]
    impl Transport for Null {
        async fn send(&self, _call: &ServiceCallSpec, _cancel: CancellationToken) -> GatewayResult<Value> {
            Ok(Value::Null)
        }
    }

    fn registry() -> PipelineRegistry {
        let mut config = GatewayConfig::default();
        config.services.0.insert(
            "payment-refunds".into(),
            ServiceConfig::new("http://127.0.0.1:3004", "/api/payments/refunds", FallbackKind::None),
        );
        PipelineRegistry::from_config(&config, Arc::new(Null))
    }

    #[test]
    fn test_one_pipeline_per_service() {
        let registry = registry();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["inventory", "payment", "payment-refunds", "shipping"]);
        assert!(registry.get("payment").is_some());
        assert!(registry.get("billing").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = registry();
        assert_eq!(registry.route("/api/payments/order-1").unwrap().name(), "payment");
        assert_eq!(registry.route("/api/payments/refunds/9").unwrap().name(), "payment-refunds");
        assert_eq!(registry.route("/api/inventory").unwrap().name(), "inventory");
        assert_eq!(registry.route("/api/shipping?x=1").unwrap().name(), "shipping");
        assert!(registry.route("/api/paymentsx").is_none());
        assert!(registry.route("/api/orders").is_none());
    }

    #[test]
    fn test_apply_updates_existing_pipeline() {
        let registry = registry();
        let mut config = GatewayConfig::default();
        if let Some(payment) = config.services.get_mut("payment") {
            payment.timeout_ms = 750;
        }
        registry.apply(&config);

        let payment = registry.get("payment").unwrap();
        assert_eq!(payment.snapshot().timeout_ms, Some(750));
    }
}
