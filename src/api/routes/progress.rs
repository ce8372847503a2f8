//! Server-sent progress events.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::downloader::{progress_updates, JobKey, SourceReference};

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub url: Option<String>,
    /// Narrows the job to one rendition; the latest job for the URL otherwise
    pub format_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/progress", get(stream_progress))
}

/// Job key for a query, using the same URL normalization as the executor
fn job_key(state: &AppState, url: &str, format_id: Option<&str>) -> JobKey {
    let url = SourceReference::parse(url, state.allowed_hosts())
        .map(|source| source.as_str().to_string())
        .unwrap_or_else(|_| url.trim().to_string());

    match format_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => JobKey::new(url, id),
        None => JobKey::for_url(url),
    }
}

async fn stream_progress(
    State(state): State<AppState>,
    query: Result<Query<ProgressQuery>, QueryRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let Query(query) = query?;
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("url query parameter is required"))?;

    let key = job_key(&state, &url, query.format_id.as_deref());
    tracing::debug!(job = %key, "Progress stream opened");

    let events = progress_updates(state.tracker.clone(), key, state.progress_interval)
        .map(|snapshot| Event::default().json_data(&snapshot));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use crate::api::routes::create_router;
    use crate::api::test_support::{test_state, ScriptedExtractor};
    use crate::downloader::{JobKey, StagedArtifact};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt;

    fn events(body: &str) -> Vec<serde_json::Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim_start()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn completed_job_sends_terminal_event_and_closes() {
        let (_dir, state) = test_state(ScriptedExtractor::new()).await;
        let key = JobKey::new("https://www.youtube.com/watch?v=abc", "137");
        state.tracker.begin(&key);
        state.tracker.set(&key, 42.0);

        let tracker = state.tracker.clone();
        let writer_key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            tracker.complete(
                &writer_key,
                Some(StagedArtifact {
                    download_url: "/api/file/x.mp4".to_string(),
                    filename: "video.mp4".to_string(),
                }),
            );
        });

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/progress?url=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3Dabc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        // the body only ends because the stream closes itself
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let events = events(std::str::from_utf8(&bytes).unwrap());

        assert_eq!(events.first().unwrap()["progress"], 42.0);
        let last = events.last().unwrap();
        assert_eq!(last["progress"], 100.0);
        assert_eq!(last["status"], "completed");
        assert_eq!(last["downloadUrl"], "/api/file/x.mp4");
        assert_eq!(
            events.iter().filter(|e| e["status"] == "completed").count(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_job_reports_pending() {
        let (_dir, state) = test_state(ScriptedExtractor::new()).await;
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/progress?url=https%3A%2F%2Fyoutu.be%2Fnone&format_id=18")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        let events = events(&text);
        assert_eq!(events[0]["progress"], 0.0);
        assert_eq!(events[0]["status"], "pending");
    }

    #[tokio::test]
    async fn missing_url_is_rejected() {
        let (_dir, state) = test_state(ScriptedExtractor::new()).await;
        let response = create_router(state)
            .oneshot(Request::builder().uri("/api/progress").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
