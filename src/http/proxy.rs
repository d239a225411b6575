//! Pass-through to collaborators under `/api/{payments|inventory|shipping}`.
//!
//! The method, path, query and JSON body are preserved. The call runs
//! through the matching pipeline; any failure becomes a 503.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::http::request::request_id;
use crate::http::response::json_error;
use crate::http::server::AppState;
use crate::pipeline::service::title_case;
use crate::pipeline::ServiceCallSpec;

pub async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let Some(pipeline) = state.registry.route(&path) else {
        return json_error(StatusCode::NOT_FOUND, json!({ "error": "Not found", "path": path }));
    };

    let method = request.method().clone();
    let request_id = request_id(request.headers());
    let limit = state.settings.load().security.max_body_size;
    let bytes = match to_bytes(request.into_body(), limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                json!({ "error": "Request body rejected", "message": e.to_string() }),
            );
        }
    };
    let payload = if bytes.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    json!({ "error": "Invalid JSON body", "message": e.to_string() }),
                );
            }
        }
    };

    let mut call = ServiceCallSpec::new(pipeline.name(), method, path_and_query).with_request_id(request_id);
    call.payload = payload;

    match pipeline.execute(&call, &CancellationToken::new()).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            tracing::warn!(target_service = %pipeline.name(), path = %path, error = %e, "Proxied call failed");
            let mut body = json!({
                "error": format!("{} service error", title_case(pipeline.name())),
                "message": e.to_string(),
            });
            if let GatewayError::Downstream { status: Some(status), .. } = &e {
                body["status"] = json!(status);
            }
            json_error(StatusCode::SERVICE_UNAVAILABLE, body)
        }
    }
}
