//! API route modules.

pub mod download;
pub mod files;
pub mod formats;
pub mod health;
pub mod progress;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(formats::router())
        .merge(download::router())
        .merge(progress::router())
        .merge(files::router())
        .merge(health::router())
        .with_state(state)
}
