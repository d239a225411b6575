//! Collaborator health probes.
//!
//! Probes bypass breakers: a tripped breaker must not hide a recovered
//! service, and probing must not consume a half-open slot.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ServicesConfig;
use crate::observability::metrics;
use crate::pipeline::{ServiceCallSpec, Transport};
use crate::resilience::TimeoutGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate answer for `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub gateway: HealthStatus,
    pub services: Vec<ServiceHealth>,
}

pub struct HealthProbe {
    transport: Arc<dyn Transport>,
}

impl HealthProbe {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Probe every service concurrently, each under its own deadline.
    pub async fn check_all(&self, services: &ServicesConfig, timeout: Duration) -> HealthReport {
        let probes = services
            .iter()
            .map(|(name, service)| self.check_one(name, &service.health_path, timeout));
        let services = join_all(probes).await;

        let status = if services.iter().all(|s| s.status == HealthStatus::Up) {
            HealthStatus::Up
        } else {
            HealthStatus::Partial
        };
        HealthReport {
            status,
            gateway: HealthStatus::Up,
            services,
        }
    }

    async fn check_one(&self, name: &str, path: &str, timeout: Duration) -> ServiceHealth {
        let call = ServiceCallSpec::get(name, path);
        let guard = TimeoutGuard::new(name, timeout);
        let result = guard
            .run(&CancellationToken::new(), |token| self.transport.send(&call, token))
            .await;

        let up = result.is_ok();
        metrics::record_service_health(name, up);
        match result {
            Ok(_) => ServiceHealth {
                service: name.to_string(),
                status: HealthStatus::Up,
                error: None,
            },
            Err(e) => {
                tracing::warn!(target_service = %name, error = %e, "Health probe failed");
                ServiceHealth {
                    service: name.to_string(),
                    status: HealthStatus::Down,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
