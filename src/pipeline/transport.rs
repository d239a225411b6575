//! Downstream transports.
//!
//! A [`Transport`] turns a [`ServiceCallSpec`] into a JSON answer. The HTTP
//! transport talks to real collaborators; tests and the `in_memory`
//! collaborator mode plug in other implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ServicesConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::pipeline::call::ServiceCallSpec;

/// Largest downstream body the gateway will buffer.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Sends one call to its target.
///
/// Implementations must stop work promptly once `cancel` fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, call: &ServiceCallSpec, cancel: CancellationToken) -> GatewayResult<Value>;
}

/// Parse a downstream body: JSON when possible, otherwise the raw text.
pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Human-readable message for a failed answer.
pub fn error_message(status: u16, body: &Value) -> String {
    body.get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| body.as_str().filter(|s| !s.is_empty()).map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// HTTP/1.1 transport over a shared pooled client.
pub struct HttpTransport {
    client: Client<HttpConnector, Body>,
    endpoints: HashMap<String, Url>,
}

impl HttpTransport {
    pub fn from_config(services: &ServicesConfig) -> GatewayResult<Self> {
        let mut endpoints = HashMap::new();
        for (name, service) in services.iter() {
            let url = Url::parse(&service.base_url)
                .map_err(|e| GatewayError::Internal(format!("invalid base_url for {}: {}", name, e)))?;
            endpoints.insert(name.clone(), url);
        }

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { client, endpoints })
    }

    fn uri_for(&self, call: &ServiceCallSpec) -> GatewayResult<Uri> {
        let base = self
            .endpoints
            .get(&call.target)
            .ok_or_else(|| GatewayError::Internal(format!("no endpoint for target {}", call.target)))?;
        format!("{}{}", base.as_str().trim_end_matches('/'), call.path)
            .parse::<Uri>()
            .map_err(|e| GatewayError::Validation(format!("invalid path {}: {}", call.path, e)))
    }

    fn build_request(&self, call: &ServiceCallSpec) -> GatewayResult<Request<Body>> {
        let mut builder = Request::builder()
            .method(call.method.clone())
            .uri(self.uri_for(call)?)
            .header(header::ACCEPT, "application/json");
        if let Some(request_id) = &call.request_id {
            builder = builder.header("x-request-id", request_id.as_str());
        }

        let body = match &call.payload {
            Some(payload) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                let bytes = serde_json::to_vec(payload).map_err(|e| GatewayError::Internal(e.to_string()))?;
                Body::from(bytes)
            }
            None => Body::empty(),
        };
        builder.body(body).map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, call: &ServiceCallSpec, cancel: CancellationToken) -> GatewayResult<Value> {
        let request = self.build_request(call)?;

        let response: Response<Incoming> = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(GatewayError::transport(&call.target, "request cancelled"));
            }
            result = self.client.request(request) => {
                result.map_err(|e| GatewayError::transport(&call.target, e.to_string()))?
            }
        };

        let status = response.status();
        let bytes = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(GatewayError::transport(&call.target, "request cancelled"));
            }
            result = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES) => {
                result.map_err(|e| GatewayError::transport(&call.target, e.to_string()))?
            }
        };
        let body = parse_body(&bytes);

        if status.is_success() {
            Ok(body)
        } else {
            tracing::debug!(target_service = %call.target, status = status.as_u16(), "Downstream error answer");
            Err(GatewayError::Downstream {
                target: call.target.clone(),
                status: Some(status.as_u16()),
                message: error_message(status.as_u16(), &body),
                body: Some(body),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackKind, ServiceConfig};
    use serde_json::json;

    fn transport() -> HttpTransport {
        let mut services = ServicesConfig::default();
        services.0.insert(
            "ledger".into(),
            ServiceConfig::new("http://127.0.0.1:4000/", "/api/ledger", FallbackKind::None),
        );
        HttpTransport::from_config(&services).unwrap()
    }

    #[tokio::test]
    async fn test_uri_joins_base_and_path() {
        let t = transport();
        let call = ServiceCallSpec::get("ledger", "/api/ledger/1?full=true");
        assert_eq!(t.uri_for(&call).unwrap().to_string(), "http://127.0.0.1:4000/api/ledger/1?full=true");
    }

    #[tokio::test]
    async fn test_unknown_target_is_internal_error() {
        let t = transport();
        let call = ServiceCallSpec::get("billing", "/x");
        assert!(matches!(t.uri_for(&call), Err(GatewayError::Internal(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let mut services = ServicesConfig::default();
        services.0.clear();
        services.0.insert(
            "ledger".into(),
            ServiceConfig::new("http://127.0.0.1:1", "/api/ledger", FallbackKind::None),
        );
        let t = HttpTransport::from_config(&services).unwrap();
        let err = t
            .send(&ServiceCallSpec::get("ledger", "/health"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.counts_as_failure());
        assert_eq!(err.downstream_status(), None);
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(404, &json!({"error": "Payment not found"})), "Payment not found");
        assert_eq!(
            error_message(500, &json!({"error": "Failed", "message": "Database update error"})),
            "Database update error"
        );
        assert_eq!(error_message(502, &Value::Null), "HTTP 502");
        assert_eq!(parse_body(b"OK"), json!("OK"));
    }
}
