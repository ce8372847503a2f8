//! API error handling.
//!
//! Every failure leaves the service as `{"error": "<message>"}`.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::downloader::DownloadError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let status = match &err {
            DownloadError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DownloadError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DownloadError::UpstreamExtractionFailed(_) => StatusCode::BAD_GATEWAY,
            DownloadError::NoRenditionsAvailable | DownloadError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DownloadError::TransferFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DownloadError::Busy | DownloadError::ToolNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            DownloadError::Io(e) => {
                tracing::error!("IO error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if let DownloadError::ToolNotFound(tool) = &err {
            tracing::error!(tool = %tool, "Extraction tool could not be started");
        }
        ApiError::new(status, err.client_message())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
