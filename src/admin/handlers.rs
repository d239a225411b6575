use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::pipeline::PipelineSnapshot;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub collaborators: crate::config::CollaboratorMode,
    pub pipelines: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub window_secs: u64,
    pub max_requests: u32,
    pub active_windows: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let settings = state.settings.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        collaborators: settings.collaborators.mode,
        pipelines: state.registry.names().count(),
    })
}

pub async fn get_pipelines(State(state): State<AppState>) -> Json<Vec<PipelineSnapshot>> {
    Json(state.registry.snapshot())
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitStatus> {
    let settings = state.settings.load();
    Json(RateLimitStatus {
        enabled: state.limiter.is_enabled(),
        window_secs: settings.rate_limit.window_secs,
        max_requests: settings.rate_limit.max_requests,
        active_windows: state.limiter.active_windows(),
    })
}
