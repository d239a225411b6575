//! Fixed-window rate limiting keyed by caller.
//!
//! A window starts at the caller's first request and lasts `window_secs`.
//! Up to `max_requests` are admitted inside it; the next one is rejected
//! until the window expires and a fresh one starts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again after a minute";

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    count: u32,
    window_start: Instant,
}

/// Budget left after an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Per-key fixed-window counters.
pub struct RateLimiter {
    config: ArcSwap<RateLimitConfig>,
    windows: DashMap<String, RateLimitWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            windows: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.load().enabled
    }

    /// Replace limits. Live windows keep their counts and start times.
    pub fn update_config(&self, config: RateLimitConfig) {
        self.config.store(Arc::new(config));
    }

    /// Admit or reject one request from `key`.
    pub fn check(&self, key: &str) -> GatewayResult<RateLimitDecision> {
        let config = self.config.load();
        let window = config.window();
        let now = Instant::now();

        // The entry guard holds the shard lock, so count-and-compare is atomic per key.
        let mut entry = self.windows.entry(key.to_string()).or_insert(RateLimitWindow {
            count: 0,
            window_start: now,
        });
        if now.saturating_duration_since(entry.window_start) >= window {
            *entry = RateLimitWindow {
                count: 0,
                window_start: now,
            };
        }

        let reset_after = window.saturating_sub(now.saturating_duration_since(entry.window_start));
        if entry.count >= config.max_requests {
            return Err(GatewayError::RateLimitExceeded {
                key: key.to_string(),
                retry_after: reset_after,
            });
        }

        entry.count += 1;
        Ok(RateLimitDecision {
            limit: config.max_requests,
            remaining: config.max_requests - entry.count,
            reset_after,
        })
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let window = self.config.load().window();
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.window_start) < window);
        before.saturating_sub(self.windows.len())
    }

    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

/// Rejection response for an exhausted caller.
pub fn too_many_requests(limit: u32, retry_after: Duration) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests",
            "message": RATE_LIMIT_MESSAGE,
        })),
    )
        .into_response();
    let headers = response.headers_mut();
    set_header(headers, "retry-after", retry_after.as_secs().max(1));
    set_header(headers, "x-ratelimit-limit", limit);
    set_header(headers, "x-ratelimit-remaining", 0);
    response
}

/// Middleware applying the limiter to every request, keyed by peer IP.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let key = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match limiter.check(&key) {
        Ok(decision) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            set_header(headers, "x-ratelimit-limit", decision.limit);
            set_header(headers, "x-ratelimit-remaining", decision.remaining);
            response
        }
        Err(GatewayError::RateLimitExceeded { retry_after, .. }) => {
            tracing::warn!(client = %key, "Rate limit exceeded");
            metrics::record_rate_limited();
            too_many_requests(limiter.config.load().max_requests, retry_after)
        }
        Err(e) => {
            tracing::error!(client = %key, error = %e, "Rate limiter failed");
            next.run(request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            window_secs: 60,
            max_requests,
            sweep_interval_secs: 60,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_request_over_budget() {
        let limiter = limiter(5);
        for i in 0..5 {
            let decision = limiter.check("10.0.0.1").unwrap();
            assert_eq!(decision.remaining, 4 - i);
        }
        match limiter.check("10.0.0.1") {
            Err(GatewayError::RateLimitExceeded { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(60))
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_restores_budget() {
        let limiter = limiter(2);
        limiter.check("10.0.0.1").unwrap();
        limiter.check("10.0.0.1").unwrap();
        assert!(limiter.check("10.0.0.1").is_err());

        tokio::time::advance(Duration::from_secs(30)).await;
        match limiter.check("10.0.0.1") {
            Err(GatewayError::RateLimitExceeded { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(30))
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.check("10.0.0.1").unwrap().remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter(1);
        limiter.check("10.0.0.1").unwrap();
        assert!(limiter.check("10.0.0.1").is_err());
        assert!(limiter.check("10.0.0.2").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_removes_only_expired_windows() {
        let limiter = limiter(10);
        limiter.check("old").unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        limiter.check("fresh").unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.active_windows(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config_changes_budget() {
        let limiter = limiter(1);
        limiter.check("10.0.0.1").unwrap();
        limiter.update_config(RateLimitConfig {
            max_requests: 3,
            ..RateLimitConfig::default()
        });
        assert_eq!(limiter.check("10.0.0.1").unwrap().remaining, 1);
    }

    #[test]
    fn test_rejection_response_headers() {
        let response = too_many_requests(100, Duration::from_millis(1500));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "1");
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    }
}
