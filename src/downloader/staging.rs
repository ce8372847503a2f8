// Transient files for staged delivery

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::errors::DownloadError;
use super::models::StagedArtifact;
use super::utils::{content_type_for, download_filename, normalize_container};

/// Default lifetime of an artifact nobody fetched
pub const DEFAULT_STAGED_FILE_TTL: Duration = Duration::from_secs(600);

/// Route prefix under which staged files are served
pub const FILE_ROUTE_PREFIX: &str = "/api/file/";

/// A reserved output location for one staged job
#[derive(Debug, Clone)]
pub struct StagingSlot {
    id: Uuid,
    container: String,
    path: PathBuf,
}

impl StagingSlot {
    /// Name on disk and in the download URL, e.g. "<uuid>.mp4"
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.container)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// yt-dlp output template; the tool fills in the real extension
    pub fn output_template(&self) -> PathBuf {
        self.path.with_file_name(format!("{}.%(ext)s", self.id))
    }
}

#[derive(Debug, Clone)]
struct StagedEntry {
    path: PathBuf,
    container: String,
}

/// A claimed artifact. The file is deleted when this value is dropped,
/// normally once the response body has been fully sent.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    container: String,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.container)
    }

    pub fn download_name(&self) -> String {
        download_filename(&self.container)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed served staged file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staged file")
            }
        }
    }
}

/// Directory of per-job output files plus a registry of finished ones
#[derive(Clone)]
pub struct StagingArea {
    dir: PathBuf,
    ttl: Duration,
    ready: Arc<DashMap<String, StagedEntry>>,
}

impl StagingArea {
    pub async fn create(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, DownloadError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), ttl_secs = ttl.as_secs(), "Staging area ready");
        Ok(Self {
            dir,
            ttl,
            ready: Arc::new(DashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a fresh, job-unique output path
    pub fn allocate(&self, container: &str) -> StagingSlot {
        let id = Uuid::new_v4();
        let container = normalize_container(container);
        let path = self.dir.join(format!("{}.{}", id, container));
        StagingSlot {
            id,
            container,
            path,
        }
    }

    /// Find the finished output of a slot, `<uuid>.<ext>` with no
    /// intermediate suffix. The returned slot carries the real container.
    pub async fn locate(&self, slot: &StagingSlot) -> Result<StagingSlot, DownloadError> {
        let prefix = format!("{}.", slot.id);
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(ext) = name.strip_prefix(&prefix) else {
                continue;
            };
            if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Ok(StagingSlot {
                    id: slot.id,
                    container: ext.to_lowercase(),
                    path: entry.path(),
                });
            }
        }

        Err(DownloadError::TransferFailed(
            "Transfer produced no output file".to_string(),
        ))
    }

    /// Publish a finished slot and start its unclaimed-file timer
    pub fn register(&self, slot: &StagingSlot) -> StagedArtifact {
        let file_name = slot.file_name();
        self.ready.insert(
            file_name.clone(),
            StagedEntry {
                path: slot.path.clone(),
                container: slot.container.clone(),
            },
        );

        let ready = self.ready.clone();
        let ttl = self.ttl;
        let name = file_name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some((_, entry)) = ready.remove(&name) {
                tracing::info!(file = %name, "Removing unclaimed staged file");
                if let Err(e) = tokio::fs::remove_file(&entry.path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(file = %name, error = %e, "Failed to remove staged file");
                    }
                }
            }
        });

        StagedArtifact {
            download_url: format!("{}{}", FILE_ROUTE_PREFIX, file_name),
            filename: download_filename(&slot.container),
        }
    }

    /// Claim a registered file for serving. Each file can be claimed once.
    pub fn take(&self, file_name: &str) -> Result<StagedFile, DownloadError> {
        if !is_valid_file_name(file_name) {
            return Err(DownloadError::NotFound(file_name.to_string()));
        }
        let (_, entry) = self
            .ready
            .remove(file_name)
            .ok_or_else(|| DownloadError::NotFound(file_name.to_string()))?;
        Ok(StagedFile {
            path: entry.path,
            container: entry.container,
        })
    }

    /// Remove every file belonging to a slot, including `.part` and
    /// `.fNNN` intermediates the tool leaves next to the target.
    pub async fn discard(&self, slot: &StagingSlot) {
        self.ready.remove(&slot.file_name());
        let prefix = slot.id.to_string();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Cannot scan staging dir");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => tracing::debug!(file = %name.to_string_lossy(), "Removed partial output"),
                    Err(e) => tracing::warn!(
                        file = %name.to_string_lossy(),
                        error = %e,
                        "Failed to remove partial output"
                    ),
                }
            }
        }
    }
}

/// "<uuid>.<ext>" and nothing else, so a request can never leave the dir
fn is_valid_file_name(name: &str) -> bool {
    let Some((stem, ext)) = name.split_once('.') else {
        return false;
    };
    Uuid::parse_str(stem).is_ok()
        && !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
}
