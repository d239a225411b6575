//! Read-only operational endpoints under `/admin`.
//!
//! Exposed on the gateway listener when `admin.enabled`. There is no
//! authentication; bind the gateway to a trusted network.

pub mod handlers;

use axum::{routing::get, Router};

use self::handlers::*;
use crate::http::server::AppState;

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/pipelines", get(get_pipelines))
        .route("/admin/rate-limits", get(get_rate_limits))
}
