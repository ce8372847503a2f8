//! One-shot download of staged artifacts.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::io::ReaderStream;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::downloader::{DownloadError, StagedFile};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/file/{filename}", get(serve_file))
}

/// File body that owns its staged file; dropping the body deletes the file.
struct StagedBody {
    reader: ReaderStream<tokio::fs::File>,
    _staged: StagedFile,
}

impl Stream for StagedBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.reader).poll_next(cx)
    }
}

/// Stream a staged file, deleting it once the body is finished or dropped.
async fn serve_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let staged = state.staging.take(&filename)?;
    let file = tokio::fs::File::open(staged.path()).await.map_err(|e| {
        tracing::warn!(file = %filename, error = %e, "Staged file vanished");
        ApiError::not_found("File not found")
    })?;
    let length = file.metadata().await.map_err(DownloadError::from)?.len();

    let content_type = staged.content_type();
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        staged.download_name()
    ))
    .map_err(|e| ApiError::internal(e.to_string()))?;

    tracing::info!(file = %filename, bytes = length, "Serving staged file");

    let body = StagedBody {
        reader: ReaderStream::new(file),
        _staged: staged,
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(length)),
        ],
        Body::from_stream(body),
    )
        .into_response())
}
