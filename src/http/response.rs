//! Error responses.
//!
//! Every error body carries at least `error`; most add `message`, and
//! workflow aborts add `step` and `details`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::error::GatewayError;

pub const ORDER_FAILED: &str = "Failed to process order";

/// `GatewayError` rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

pub fn json_error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            GatewayError::Validation(message) => {
                json_error(StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            GatewayError::RateLimitExceeded { retry_after, .. } => {
                let mut response = json_error(
                    StatusCode::TOO_MANY_REQUESTS,
                    json!({ "error": "Too many requests", "message": "Rate limit exceeded" }),
                );
                if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            GatewayError::WorkflowAbort {
                step,
                reason,
                status,
                details,
            } => {
                let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = if code.is_server_error() {
                    json!({ "error": ORDER_FAILED, "message": reason, "step": step, "details": details })
                } else {
                    json!({ "error": reason, "step": step, "details": details })
                };
                json_error(code, body)
            }
            err @ (GatewayError::Downstream { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::CircuitOpen { .. }) => json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "Service unavailable", "message": err.to_string() }),
            ),
            GatewayError::Internal(message) => {
                tracing::error!(error = %message, "Internal error");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        }
    }
}
