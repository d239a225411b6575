//! The unit of work a pipeline executes.

use axum::http::Method;
use serde_json::Value;

/// One downstream call: where it goes, how, and with what body.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCallSpec {
    /// Target id, matching a key in `[services]`.
    pub target: String,
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    pub payload: Option<Value>,
    /// Safe to repeat; only idempotent calls are retried by default.
    pub idempotent: bool,
    /// Propagated as `x-request-id`.
    pub request_id: Option<String>,
}

impl ServiceCallSpec {
    pub fn new(target: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        let idempotent = method.is_idempotent();
        Self {
            target: target.into(),
            method,
            path: path.into(),
            payload: None,
            idempotent,
            request_id: None,
        }
    }

    pub fn get(target: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(target, Method::GET, path)
    }

    pub fn post(target: impl Into<String>, path: impl Into<String>, payload: Value) -> Self {
        Self::new(target, Method::POST, path).with_payload(payload)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Override the method-derived idempotency, e.g. for read-only POSTs.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Path without the query string.
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_idempotency_follows_method() {
        assert!(ServiceCallSpec::get("inventory", "/api/inventory").idempotent);
        let post = ServiceCallSpec::post("payment", "/api/payments", json!({}));
        assert!(!post.idempotent);
        assert!(post.idempotent(true).idempotent);
    }

    #[test]
    fn test_route_strips_query() {
        let call = ServiceCallSpec::get("inventory", "/api/inventory?page=2");
        assert_eq!(call.route(), "/api/inventory");
    }
}
