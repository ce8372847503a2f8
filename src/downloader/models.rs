// Common data models for the resolver, tracker and executor

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical quality bucket used to group renditions in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityBucket {
    #[serde(rename = "8K")]
    Uhd8k,
    #[serde(rename = "4K")]
    Uhd4k,
    /// 1440p and 1080p
    #[serde(rename = "HD")]
    Hd,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "144p")]
    P144,
    #[serde(rename = "320kbps")]
    Audio320,
    #[serde(rename = "256kbps")]
    Audio256,
    #[serde(rename = "192kbps")]
    Audio192,
    #[serde(rename = "128kbps")]
    Audio128,
    /// Audio with unknown or low bitrate
    #[serde(rename = "standard")]
    AudioStandard,
}

impl QualityBucket {
    /// Video buckets keyed by minimum short-side pixels, highest first
    pub const VIDEO_THRESHOLDS: [(u32, QualityBucket); 7] = [
        (4320, QualityBucket::Uhd8k),
        (2160, QualityBucket::Uhd4k),
        (1080, QualityBucket::Hd),
        (720, QualityBucket::P720),
        (480, QualityBucket::P480),
        (360, QualityBucket::P360),
        (240, QualityBucket::P240),
    ];

    /// Audio tiers keyed by minimum kbps, highest first
    pub const AUDIO_THRESHOLDS: [(f32, QualityBucket); 4] = [
        (320.0, QualityBucket::Audio320),
        (256.0, QualityBucket::Audio256),
        (192.0, QualityBucket::Audio192),
        (128.0, QualityBucket::Audio128),
    ];

    /// Bucket for a video with the given short side. Thresholds get the
    /// same 10% tolerance as the resolution matcher so 1072p lands in HD.
    pub fn for_video(short_side: u32) -> Self {
        Self::VIDEO_THRESHOLDS
            .iter()
            .find(|(min, _)| short_side >= min * 9 / 10)
            .map(|(_, bucket)| *bucket)
            .unwrap_or(QualityBucket::P144)
    }

    pub fn for_audio(bitrate_kbps: Option<f32>) -> Self {
        let Some(kbps) = bitrate_kbps else {
            return QualityBucket::AudioStandard;
        };
        Self::AUDIO_THRESHOLDS
            .iter()
            .find(|(min, _)| kbps >= *min)
            .map(|(_, bucket)| *bucket)
            .unwrap_or(QualityBucket::AudioStandard)
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            Self::Audio320 | Self::Audio256 | Self::Audio192 | Self::Audio128 | Self::AudioStandard
        )
    }

    /// Rank used for catalog ordering, higher is better.
    /// Every video bucket outranks every audio tier.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Uhd8k => 13,
            Self::Uhd4k => 12,
            Self::Hd => 11,
            Self::P720 => 10,
            Self::P480 => 9,
            Self::P360 => 8,
            Self::P240 => 7,
            Self::P144 => 6,
            Self::Audio320 => 5,
            Self::Audio256 => 4,
            Self::Audio192 => 3,
            Self::Audio128 => 2,
            Self::AudioStandard => 1,
        }
    }
}

/// One downloadable option in a catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenditionDescriptor {
    /// Opaque token understood by the extractor
    #[serde(rename = "format_id")]
    pub id: String,
    #[serde(rename = "ext")]
    pub container: String,
    /// e.g. "1080p60" or "129kbps"
    #[serde(rename = "quality")]
    pub quality_label: String,
    #[serde(rename = "has_video")]
    pub has_video_track: bool,
    #[serde(rename = "has_audio")]
    pub has_audio_track: bool,
    #[serde(rename = "filesize", skip_serializing_if = "Option::is_none")]
    pub approx_size_bytes: Option<u64>,
    /// Display size, e.g. "12.34 MB"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(rename = "fps", skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(rename = "bitrate", skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<f32>,
    pub category: QualityBucket,
}

/// Resolved listing for one source URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenditionCatalog {
    pub title: String,
    #[serde(rename = "thumbnail", skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(rename = "formats")]
    pub renditions: Vec<RenditionDescriptor>,
}

/// Lifecycle of a transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Staged output that is ready to be fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedArtifact {
    /// Path the client should GET
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
    /// Suggested name for the saved file
    pub filename: String,
}

/// Point-in-time view of a job, also the SSE payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub progress: f32,
    pub status: TransferStatus,
    #[serde(flatten)]
    pub artifact: Option<StagedArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    pub fn pending() -> Self {
        Self {
            progress: 0.0,
            status: TransferStatus::Pending,
            artifact: None,
            error: None,
        }
    }
}

/// How the executor hands bytes to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Pipe extractor stdout straight into the response
    #[default]
    Direct,
    /// Write to a transient file, serve it afterwards
    Staged,
}

/// Identifies a transfer for progress correlation.
///
/// The rendition id is part of the key so two renditions of the same URL
/// never share progress. Pollers that only know the URL are resolved
/// through the tracker's URL alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    url: String,
    rendition_id: Option<String>,
}

impl JobKey {
    pub fn new(url: impl Into<String>, rendition_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            rendition_id: Some(rendition_id.into()),
        }
    }

    /// Key for a poller that only knows the source URL
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            rendition_id: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn rendition_id(&self) -> Option<&str> {
        self.rendition_id.as_deref()
    }

    pub fn is_url_only(&self) -> bool {
        self.rendition_id.is_none()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rendition_id {
            Some(id) => write!(f, "{}#{}", self.url, id),
            None => write!(f, "{}", self.url),
        }
    }
}

/// Options for a single transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub rendition_id: String,
    /// Container to remux into when merging, e.g. "mp4"
    pub container: String,
    pub delivery: DeliveryMode,
}

impl TransferRequest {
    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.url.clone(), self.rendition_id.clone())
    }
}
