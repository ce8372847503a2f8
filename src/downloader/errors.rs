// Error types for the resolver and transfer pipeline

use thiserror::Error;

use super::extractors::diagnostics::{diagnose_error, FailureReason};

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Missing, malformed or unsupported source URL
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Extraction tool did not answer within the configured timeout
    #[error("Upstream timed out after {0}s")]
    UpstreamTimeout(u64),

    /// Extraction tool failed or produced unusable output.
    /// The message is already sanitized for clients.
    #[error("Extraction failed: {0}")]
    UpstreamExtractionFailed(String),

    /// Manifest was valid but contained nothing downloadable
    #[error("No downloadable renditions found")]
    NoRenditionsAvailable,

    /// Transfer process exited abnormally
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Admission limit for external processes was not released in time
    #[error("Too many transfers in progress, try again shortly")]
    Busy,

    /// yt-dlp (or python) could not be started
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Unknown staged artifact
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Build an extraction failure from raw stderr, keeping only the
    /// diagnosed reason so nothing from the tool leaks to clients.
    pub fn from_stderr(stderr: &str) -> Self {
        let reason = diagnose_error(stderr);
        match reason {
            FailureReason::UnsupportedUrl => Self::InvalidInput(reason.user_message().to_string()),
            _ => Self::UpstreamExtractionFailed(reason.user_message().to_string()),
        }
    }

    /// Same diagnosis, surfaced as a transfer failure.
    pub fn transfer_from_stderr(stderr: &str) -> Self {
        Self::TransferFailed(diagnose_error(stderr).user_message().to_string())
    }

    /// Message that is safe to show to an HTTP client.
    pub fn client_message(&self) -> String {
        match self {
            Self::Io(_) => "Internal file error".to_string(),
            Self::ToolNotFound(_) => "Media extraction tool is not available".to_string(),
            other => other.to_string(),
        }
    }
}
