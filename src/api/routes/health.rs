//! Health check route.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub extractor: &'static str,
    /// yt-dlp version, absent when the tool cannot be run
    pub extractor_version: Option<String>,
    pub uptime_secs: u64,
    pub tracked_jobs: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        extractor: state.extractor.name(),
        extractor_version: state.extractor.version().await,
        uptime_secs: state.start_time.elapsed().as_secs(),
        tracked_jobs: state.tracker.len(),
    })
}
