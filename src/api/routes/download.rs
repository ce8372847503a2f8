//! Transfer initiation.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::downloader::{DeliveryMode, TransferOutcome, TransferRequest};

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub format_id: String,
    /// Container to merge into, "mp4" when omitted
    pub ext: Option<String>,
    #[serde(default)]
    pub delivery: DeliveryMode,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/download", post(start_download))
}

/// Run a transfer. Direct delivery answers with the media stream, staged
/// delivery with a JSON pointer to the finished file.
async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    let transfer = TransferRequest {
        url: request.url,
        rendition_id: request.format_id.trim().to_string(),
        container: request.ext.unwrap_or_else(|| "mp4".to_string()),
        delivery: request.delivery,
    };

    match state.executor.execute(transfer).await? {
        TransferOutcome::Stream(media) => {
            let disposition = HeaderValue::from_str(&format!(
                "attachment; filename=\"{}\"",
                media.filename
            ))
            .map_err(|e| ApiError::internal(e.to_string()))?;

            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(media.content_type)),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                Body::from_stream(media.body),
            )
                .into_response())
        }
        TransferOutcome::Staged(staged) => Ok(Json(staged).into_response()),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::routes::create_router;
    use crate::api::test_support::{test_state, ScriptedExtractor, PAYLOAD};
    use crate::downloader::{JobKey, TransferStatus};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tower::ServiceExt;

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/download")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn direct_download_streams_an_attachment() {
        let (_dir, state) = test_state(ScriptedExtractor::new()).await;
        let tracker = state.tracker.clone();

        let response = create_router(state)
            .oneshot(post_json(
                r#"{"url": "https://youtube.com/watch?v=abc", "format_id": "137", "ext": "mp4"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"video.mp4\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], PAYLOAD);

        let key = JobKey::new("https://youtube.com/watch?v=abc", "137");
        for _ in 0..100 {
            if tracker.get(&key).status == TransferStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tracker.get(&key).status, TransferStatus::Completed);
        assert_eq!(tracker.get(&key).progress, 100.0);
    }

    #[tokio::test]
    async fn staged_download_returns_a_file_pointer() {
        let (dir, state) = test_state(ScriptedExtractor::new()).await;

        let response = create_router(state)
            .oneshot(post_json(
                r#"{"url": "https://youtu.be/abc", "format_id": "137", "delivery": "staged"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["filename"], "video.mp4");
        let url = json["downloadUrl"].as_str().unwrap();
        let name = url.strip_prefix("/api/file/").unwrap();
        assert!(dir.path().join(name).exists());
    }

    #[tokio::test]
    async fn unsupported_host_never_starts_a_transfer() {
        let extractor = ScriptedExtractor::new();
        let (_dir, state) = test_state(extractor.clone()).await;

        let response = create_router(state)
            .oneshot(post_json(
                r#"{"url": "https://example.com/video", "format_id": "137"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(extractor.transfer_calls.load(Ordering::SeqCst), 0);
    }
}
