// Rendition resolver - URL in, ranked catalog out

use std::sync::Arc;
use std::time::Duration;

use super::errors::DownloadError;
use super::extractors::MediaExtractor;
use super::format_selector::FormatSelector;
use super::models::RenditionCatalog;
use super::source::SourceReference;

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct RenditionResolver {
    extractor: Arc<dyn MediaExtractor>,
    allowed_hosts: Vec<String>,
    timeout: Duration,
}

impl RenditionResolver {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        allowed_hosts: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            allowed_hosts,
            timeout,
        }
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// Validate the URL, fetch its manifest and build the catalog.
    ///
    /// Nothing is spawned for an invalid URL. Dropping the returned future
    /// kills the extractor process.
    pub async fn resolve(&self, url: &str) -> Result<RenditionCatalog, DownloadError> {
        let source = SourceReference::parse(url, &self.allowed_hosts)?;
        tracing::info!(
            url = source.as_str(),
            host = source.host(),
            extractor = self.extractor.name(),
            "Resolving renditions"
        );

        let manifest = self
            .extractor
            .resolve_manifest(source.as_str(), self.timeout)
            .await?;
        let raw = manifest.formats.len();
        let catalog = FormatSelector::build_catalog(manifest)?;

        tracing::info!(
            url = source.as_str(),
            raw,
            renditions = catalog.renditions.len(),
            "Resolved renditions"
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::extractors::{Manifest, MediaProcess, MediaSelection};
    use crate::downloader::source::default_allowed_hosts;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedManifest {
        json: &'static str,
        calls: AtomicUsize,
    }

    impl FixedManifest {
        fn new(json: &'static str) -> Arc<Self> {
            Arc::new(Self {
                json,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MediaExtractor for FixedManifest {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn resolve_manifest(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<Manifest, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Manifest::from_json(self.json.as_bytes())
        }

        async fn stream_media(&self, _selection: MediaSelection) -> Result<MediaProcess, DownloadError> {
            unreachable!("resolver never transfers")
        }
    }

    struct Timeout;

    #[async_trait]
    impl MediaExtractor for Timeout {
        fn name(&self) -> &'static str {
            "timeout"
        }

        async fn resolve_manifest(
            &self,
            _url: &str,
            timeout: Duration,
        ) -> Result<Manifest, DownloadError> {
            Err(DownloadError::UpstreamTimeout(timeout.as_secs()))
        }

        async fn stream_media(&self, _selection: MediaSelection) -> Result<MediaProcess, DownloadError> {
            unreachable!("resolver never transfers")
        }
    }

    const TWO_1080P60: &str = r#"{
        "title": "Example",
        "duration": 212.4,
        "formats": [
            {"format_id": "299", "ext": "mp4", "url": "https://cdn/a", "width": 1920, "height": 1080,
             "fps": 60, "vcodec": "avc1.64002a", "acodec": "none", "tbr": 4400.5, "format_note": "1080p60"},
            {"format_id": "299-drc", "ext": "mp4", "url": "https://cdn/b", "width": 1920, "height": 1080,
             "fps": 60, "vcodec": "avc1.64002a", "acodec": "none", "tbr": 4300.0, "format_note": "1080p60, DRC"},
            {"format_id": "140", "ext": "m4a", "url": "https://cdn/c", "vcodec": "none",
             "acodec": "mp4a.40.2", "abr": 129.5}
        ]
    }"#;

    fn resolver(extractor: Arc<dyn MediaExtractor>) -> RenditionResolver {
        RenditionResolver::new(extractor, default_allowed_hosts(), DEFAULT_RESOLVE_TIMEOUT)
    }

    #[tokio::test]
    async fn duplicate_1080p60_entries_collapse() {
        let extractor = FixedManifest::new(TWO_1080P60);
        let catalog = resolver(extractor.clone())
            .resolve("https://youtube.com/watch?v=abc")
            .await
            .unwrap();

        assert_eq!(catalog.title, "Example");
        assert_eq!(catalog.duration_seconds, Some(212));
        let video: Vec<_> = catalog
            .renditions
            .iter()
            .filter(|r| r.quality_label == "1080p60" && r.container == "mp4")
            .collect();
        assert_eq!(video.len(), 1);
        assert_eq!(video[0].id, "299");
        assert_eq!(catalog.renditions.len(), 2);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn catalog_never_repeats_label_and_container() {
        let extractor = FixedManifest::new(TWO_1080P60);
        let catalog = resolver(extractor)
            .resolve("https://youtu.be/abc")
            .await
            .unwrap();
        let mut seen = HashSet::new();
        for r in &catalog.renditions {
            assert!(seen.insert((r.quality_label.clone(), r.container.clone())));
        }
    }

    #[tokio::test]
    async fn unsupported_host_is_rejected_before_extraction() {
        let extractor = FixedManifest::new(TWO_1080P60);
        let err = resolver(extractor.clone())
            .resolve("https://example.com/video")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidInput(_)));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_manifest_is_an_extraction_failure() {
        let extractor = FixedManifest::new("<html>rate limited</html>");
        let err = resolver(extractor)
            .resolve("https://youtube.com/watch?v=abc")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UpstreamExtractionFailed(_)));
    }

    #[tokio::test]
    async fn manifest_without_usable_entries() {
        let extractor = FixedManifest::new(
            r#"{"title": "t", "formats": [
                {"format_id": "sb0", "ext": "mhtml", "url": "https://cdn/sb", "vcodec": "none", "acodec": "none"}
            ]}"#,
        );
        let err = resolver(extractor)
            .resolve("https://youtube.com/watch?v=abc")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NoRenditionsAvailable));
    }

    #[tokio::test]
    async fn timeout_is_propagated() {
        let err = resolver(Arc::new(Timeout))
            .resolve("https://youtube.com/watch?v=abc")
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UpstreamTimeout(60)));
    }
}
