//! Fake extractor and state for router tests.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::api::server::AppState;
use crate::config::AppConfig;
use crate::downloader::extractors::{
    Manifest, MediaExtractor, MediaProcess, MediaSelection, OutputTarget,
};
use crate::downloader::{DownloadError, StagingArea};

pub const MANIFEST: &str = r#"{
    "title": "Example clip",
    "thumbnail": "https://i.ytimg.com/vi/abc/hq.jpg",
    "duration": 61.0,
    "uploader": "someone",
    "formats": [
        {"format_id": "sb0", "ext": "mhtml", "url": "https://cdn/sb", "vcodec": "none", "acodec": "none"},
        {"format_id": "137", "ext": "mp4", "url": "https://cdn/137", "width": 1920, "height": 1080,
         "fps": 60, "vcodec": "avc1", "acodec": "none", "tbr": 4400.0, "filesize": 50000000},
        {"format_id": "137-1", "ext": "mp4", "url": "https://cdn/137-1", "width": 1920, "height": 1080,
         "fps": 60, "vcodec": "avc1", "acodec": "none", "tbr": 4200.0},
        {"format_id": "18", "ext": "mp4", "url": "https://cdn/18", "width": 640, "height": 360,
         "fps": 30, "vcodec": "avc1", "acodec": "mp4a"},
        {"format_id": "140", "ext": "m4a", "url": "https://cdn/140", "vcodec": "none", "acodec": "mp4a",
         "abr": 129.5}
    ]
}"#;

pub const PAYLOAD: &[u8] = b"fake muxed media";

/// Answers with [`MANIFEST`] and produces [`PAYLOAD`] for every transfer
pub struct ScriptedExtractor {
    pub resolve_calls: AtomicUsize,
    pub transfer_calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            resolve_calls: AtomicUsize::new(0),
            transfer_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MediaExtractor for ScriptedExtractor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn resolve_manifest(
        &self,
        _url: &str,
        _timeout: Duration,
    ) -> Result<Manifest, DownloadError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Manifest::from_json(MANIFEST.as_bytes())
    }

    async fn stream_media(&self, selection: MediaSelection) -> Result<MediaProcess, DownloadError> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let (mut writer, reader) = tokio::io::duplex(1024);
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            match &selection.target {
                OutputTarget::Stdout => {
                    let _ = writer.write_all(PAYLOAD).await;
                }
                OutputTarget::File(template) => {
                    let path = template
                        .to_string_lossy()
                        .replace("%(ext)s", &selection.merge_container);
                    let _ = tokio::fs::write(PathBuf::from(path), PAYLOAD).await;
                }
            }
            drop(writer);
            let _ = exit_tx.send(Some(0));
        });

        let lines = vec![
            "[download]  50.0% of 1MiB".to_string(),
            "[download] 100% of 1MiB".to_string(),
        ];
        Ok(MediaProcess {
            output: Box::new(reader),
            progress: stream::iter(lines).boxed(),
            exit: exit_rx,
            cancel: CancellationToken::new(),
        })
    }

    async fn version(&self) -> Option<String> {
        Some("2025.01.01".to_string())
    }
}

/// State over a temp staging dir. Keep the dir alive for the test.
pub async fn test_state(extractor: Arc<ScriptedExtractor>) -> (TempDir, AppState) {
    let dir = TempDir::new().unwrap();
    let config = AppConfig {
        staging_dir: dir.path().to_path_buf(),
        progress_interval: Duration::from_millis(20),
        ..AppConfig::default()
    };
    let staging = StagingArea::create(&config.staging_dir, config.staged_file_ttl)
        .await
        .unwrap();
    (dir, AppState::new(extractor, staging, &config))
}
