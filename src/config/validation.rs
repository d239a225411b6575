//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (workflow steps reference existing services)
//! - Validate value ranges (thresholds, windows, backoff bounds)
//!
//! Returns all validation errors, not just the first.

use std::fmt;

use crate::config::schema::{GatewayConfig, ServiceConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "must be a socket address"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than 0"));
    }
    if rate_limit.max_requests == 0 {
        errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
    }

    if config.services.0.is_empty() {
        errors.push(ValidationError::new("services", "at least one service is required"));
    }

    for (name, service) in config.services.iter() {
        validate_service(name, service, &mut errors);
    }

    let orchestration = &config.orchestration;
    for (field, name) in [
        ("orchestration.inventory_service", &orchestration.inventory_service),
        ("orchestration.payment_service", &orchestration.payment_service),
        ("orchestration.shipping_service", &orchestration.shipping_service),
    ] {
        if config.services.get(name).is_none() {
            errors.push(ValidationError::new(field, format!("unknown service '{}'", name)));
        }
    }

    if config.health.probe_timeout_ms == 0 {
        errors.push(ValidationError::new("health.probe_timeout_ms", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(name: &str, service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    let field = |suffix: &str| format!("services.{}.{}", name, suffix);

    match url::Url::parse(&service.base_url) {
        Ok(url) if url.scheme() == "http" => {}
        Ok(url) if url.scheme() == "https" => errors.push(ValidationError::new(
            field("base_url"),
            "must be an http:// URL; TLS collaborators are not supported",
        )),
        _ => errors.push(ValidationError::new(field("base_url"), "must be an http:// URL")),
    }
    if !service.route_prefix.starts_with('/') {
        errors.push(ValidationError::new(field("route_prefix"), "must start with '/'"));
    }
    if !service.health_path.starts_with('/') {
        errors.push(ValidationError::new(field("health_path"), "must start with '/'"));
    }

    let breaker = &service.breaker;
    if !(0.0..=100.0).contains(&breaker.error_threshold_percentage) {
        errors.push(ValidationError::new(field("breaker.error_threshold_percentage"), "must be within 0..=100"));
    }
    if breaker.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(field("breaker.reset_timeout_ms"), "must be greater than 0"));
    }
    if breaker.rolling_buckets == 0 || breaker.rolling_window_ms < breaker.rolling_buckets as u64 {
        errors.push(ValidationError::new(
            field("breaker.rolling_buckets"),
            "must be at least 1 and no larger than rolling_window_ms",
        ));
    }

    let retry = &service.retry;
    if retry.max_attempts == 0 {
        errors.push(ValidationError::new(field("retry.max_attempts"), "must be at least 1"));
    }
    if retry.min_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(field("retry.min_delay_ms"), "must not exceed max_delay_ms"));
    }
    if retry.multiplier < 1.0 || !retry.multiplier.is_finite() {
        errors.push(ValidationError::new(field("retry.multiplier"), "must be a finite number >= 1.0"));
    }
}
