//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_breaker_transitions_total` (counter): breaker state changes
//! - `gateway_breaker_rejections_total` (counter): calls denied while open
//! - `gateway_retries_total` (counter): retry attempts per target
//! - `gateway_timeouts_total` (counter): deadline expirations per target
//! - `gateway_rate_limited_total` (counter): rejected callers
//! - `gateway_orders_total` (counter): workflow outcomes
//! - `gateway_service_up` (gauge): 1=UP, 0=DOWN from health probes
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("route", route.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_breaker_transition(target: &str, from: &'static str, to: &'static str) {
    counter!(
        "gateway_breaker_transitions_total",
        "target" => target.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejection(target: &str) {
    counter!("gateway_breaker_rejections_total", "target" => target.to_string()).increment(1);
}

pub fn record_retry(target: &str) {
    counter!("gateway_retries_total", "target" => target.to_string()).increment(1);
}

pub fn record_timeout(target: &str) {
    counter!("gateway_timeouts_total", "target" => target.to_string()).increment(1);
}

pub fn record_rate_limited() {
    counter!("gateway_rate_limited_total").increment(1);
}

pub fn record_order(outcome: &'static str) {
    counter!("gateway_orders_total", "outcome" => outcome).increment(1);
}

pub fn record_service_health(service: &str, up: bool) {
    gauge!("gateway_service_up", "service" => service.to_string()).set(if up { 1.0 } else { 0.0 });
}
