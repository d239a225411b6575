//! `POST /api/orders`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::http::request::request_id;
use crate::http::response::{json_error, ApiError};
use crate::http::server::AppState;
use crate::orchestration::OrderRequest;

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid request body", "message": rejection.body_text() }),
            );
        }
    };

    match state.engine.place_order(request, request_id(&headers)).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
