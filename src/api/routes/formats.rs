//! Rendition listing.

use axum::{extract::rejection::JsonRejection, extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::downloader::RenditionCatalog;

#[derive(Debug, Deserialize)]
pub struct FormatsRequest {
    #[serde(default)]
    pub url: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/formats", post(list_formats))
}

/// Resolve the renditions of a source URL.
async fn list_formats(
    State(state): State<AppState>,
    payload: Result<Json<FormatsRequest>, JsonRejection>,
) -> ApiResult<Json<RenditionCatalog>> {
    let Json(request) = payload?;
    let catalog = state.resolver.resolve(&request.url).await?;
    Ok(Json(catalog))
}
