// MediaExtractor trait and manifest types

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::downloader::errors::DownloadError;

/// How the yt-dlp executable is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractorMode {
    /// Native `yt-dlp` binary
    #[default]
    Cli,
    /// `python3 -m yt_dlp`
    Python,
}

impl fmt::Display for ExtractorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Python => write!(f, "python"),
        }
    }
}

impl std::str::FromStr for ExtractorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cli" | "binary" => Ok(Self::Cli),
            "python" | "module" => Ok(Self::Python),
            other => Err(format!("Unknown extractor mode: {}", other)),
        }
    }
}

/// One entry of the manifest's `formats[]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManifestFormat {
    pub format_id: String,
    pub ext: String,
    pub url: Option<String>,
    pub manifest_url: Option<String>,
    pub fragments: Option<Vec<serde_json::Value>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f32>,
    /// Video codec, "none" when absent
    pub vcodec: Option<String>,
    /// Audio codec, "none" when absent
    pub acodec: Option<String>,
    pub video_ext: Option<String>,
    pub audio_ext: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    /// Total bitrate in kbps
    pub tbr: Option<f32>,
    /// Audio bitrate in kbps
    pub abr: Option<f32>,
    /// Video bitrate in kbps
    pub vbr: Option<f32>,
    pub format_note: Option<String>,
    pub protocol: Option<String>,
}

/// Parsed output of a resolve call
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub id: Option<String>,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub formats: Vec<ManifestFormat>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ManifestFormat>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ManifestFormat>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Manifest {
    /// Parse `-J` output. Any JSON problem is an extraction failure.
    pub fn from_json(stdout: &[u8]) -> Result<Self, DownloadError> {
        serde_json::from_slice(stdout).map_err(|e| {
            tracing::warn!(error = %e, "Extractor returned malformed manifest JSON");
            DownloadError::UpstreamExtractionFailed("Invalid format data received".to_string())
        })
    }
}

/// Where the media bytes should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Write to stdout for direct piping
    Stdout,
    /// Write to this path (yt-dlp may create intermediates next to it)
    File(PathBuf),
}

/// Everything the executor needs to drive one transfer
#[derive(Debug, Clone)]
pub struct MediaSelection {
    pub url: String,
    /// yt-dlp format selector, e.g. "137[acodec=none]+bestaudio/137"
    pub selector: String,
    /// Container used when the selector merges streams
    pub merge_container: String,
    pub target: OutputTarget,
}

/// A running transfer process.
///
/// `output` carries media bytes (empty for file targets). `progress`
/// yields every diagnostic line the tool prints, progress and errors
/// alike, and ends when the tool closes its pipes. `exit` resolves with
/// the exit code, or `None` when the process was killed through `cancel`.
pub struct MediaProcess {
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub progress: BoxStream<'static, String>,
    pub exit: oneshot::Receiver<Option<i32>>,
    pub cancel: CancellationToken,
}

/// Abstraction over the external extraction tool
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    /// Fetch the JSON manifest for a URL, bounded by `timeout`
    async fn resolve_manifest(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Manifest, DownloadError>;

    /// Start producing media for a selection
    async fn stream_media(&self, selection: MediaSelection) -> Result<MediaProcess, DownloadError>;

    /// Tool version for the health route
    async fn version(&self) -> Option<String> {
        None
    }
}
