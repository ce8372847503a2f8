// FormatSelector - turns a raw manifest into a clean rendition catalog
//
// Handles:
// - Filtering entries without a locator or without any track
// - Track layout detection when codecs are missing
// - Quality labels (1080p60, 129kbps) and bucket categorization
// - Canonical ranking, then dedup by (quality label, container)

use std::cmp::Ordering;
use std::collections::HashSet;

use super::errors::DownloadError;
use super::extractors::{Manifest, ManifestFormat};
use super::models::{QualityBucket, RenditionCatalog, RenditionDescriptor};
use super::utils::is_audio_container;

/// Format selector with deterministic ranking
pub struct FormatSelector;

impl FormatSelector {
    /// Build the catalog. Fails with `NoRenditionsAvailable` when nothing
    /// usable survives filtering.
    pub fn build_catalog(manifest: Manifest) -> Result<RenditionCatalog, DownloadError> {
        let renditions = Self::build_renditions(&manifest.formats);
        if renditions.is_empty() {
            return Err(DownloadError::NoRenditionsAvailable);
        }

        Ok(RenditionCatalog {
            title: manifest
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string()),
            thumbnail_url: manifest.thumbnail.filter(|t| !t.is_empty()),
            duration_seconds: manifest
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(|d| d.round() as u64),
            uploader: manifest.uploader.filter(|u| !u.is_empty()),
            renditions,
        })
    }

    /// Filter, rank and dedup renditions
    pub fn build_renditions(formats: &[ManifestFormat]) -> Vec<RenditionDescriptor> {
        let mut ranked: Vec<(RankKey, RenditionDescriptor)> = formats
            .iter()
            .filter_map(|f| Self::describe(f).map(|d| (RankKey::of(f, &d), d)))
            .collect();

        // stable: equal keys keep manifest order
        ranked.sort_by(|(a, _), (b, _)| b.quality_cmp(a));

        // dedup after ranking: the best of each (label, container) survives
        let mut seen = HashSet::new();
        ranked
            .into_iter()
            .map(|(_, d)| d)
            .filter(|d| seen.insert((d.quality_label.clone(), d.container.clone())))
            .collect()
    }

    /// Map one manifest entry, `None` when it is not downloadable
    fn describe(format: &ManifestFormat) -> Option<RenditionDescriptor> {
        if format.format_id.is_empty() || !Self::has_locator(format) {
            return None;
        }

        let (has_video, has_audio) = Self::track_layout(format);
        if !has_video && !has_audio {
            return None;
        }

        let approx_size = format.filesize.or(format.filesize_approx).filter(|s| *s > 0);
        let bitrate = if has_video {
            format.tbr.or(format.vbr)
        } else {
            format.abr.or(format.tbr)
        };

        let (quality_label, category, height) = if has_video {
            let short_side = Self::short_side(format);
            let label = Self::video_label(format, short_side);
            (label, QualityBucket::for_video(short_side.unwrap_or(0)), short_side)
        } else {
            let label = Self::audio_label(format, bitrate);
            (label, QualityBucket::for_audio(bitrate), None)
        };

        Some(RenditionDescriptor {
            id: format.format_id.clone(),
            container: format.ext.to_lowercase(),
            quality_label,
            has_video_track: has_video,
            has_audio_track: has_audio,
            approx_size_bytes: approx_size,
            size: Self::format_size(approx_size),
            frame_rate: format.fps.filter(|fps| *fps > 0.0),
            height,
            bitrate_kbps: bitrate.filter(|b| *b > 0.0),
            category,
        })
    }

    fn has_locator(format: &ManifestFormat) -> bool {
        let non_empty = |s: &Option<String>| s.as_deref().map_or(false, |v| !v.is_empty());
        non_empty(&format.url)
            || non_empty(&format.manifest_url)
            || format.fragments.as_ref().map_or(false, |f| !f.is_empty())
    }

    /// Returns (has_video, has_audio).
    ///
    /// Codec "none" is authoritative. Missing codecs fall back to the
    /// `video_ext`/`audio_ext` hints, then dimensions and container.
    pub fn track_layout(format: &ManifestFormat) -> (bool, bool) {
        fn declared(codec: &Option<String>) -> Option<bool> {
            codec
                .as_deref()
                .filter(|c| !c.is_empty())
                .map(|c| c != "none")
        }

        let audio_container = is_audio_container(&format.ext);
        let has_dimensions = format.height.is_some() || format.width.is_some();

        let video = declared(&format.vcodec)
            .or_else(|| declared(&format.video_ext))
            .unwrap_or(has_dimensions || (!audio_container && format.ext != "mhtml"));
        let audio = declared(&format.acodec)
            .or_else(|| declared(&format.audio_ext))
            .unwrap_or(audio_container || format.abr.is_some() || !has_dimensions);

        (video, audio)
    }

    /// Short side in pixels so portrait clips bucket like landscape ones
    fn short_side(format: &ManifestFormat) -> Option<u32> {
        match (format.width, format.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(w.min(h)),
            (_, Some(h)) if h > 0 => Some(h),
            (Some(w), None) if w > 0 => Some(w),
            _ => None,
        }
    }

    fn video_label(format: &ManifestFormat, short_side: Option<u32>) -> String {
        if let Some(side) = short_side {
            let fps = format.fps.map(|f| f.round() as u32).unwrap_or(0);
            return if fps > 30 {
                format!("{}p{}", side, fps)
            } else {
                format!("{}p", side)
            };
        }

        format
            .format_note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("original")
            .to_string()
    }

    fn audio_label(format: &ManifestFormat, bitrate: Option<f32>) -> String {
        if let Some(kbps) = bitrate.filter(|b| *b > 0.0) {
            return format!("{}kbps", kbps.round() as u32);
        }
        format
            .format_note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("audio")
            .to_string()
    }

    /// Format file size for display
    pub fn format_size(bytes: Option<u64>) -> Option<String> {
        bytes.map(|b| {
            let mb = b as f64 / 1_048_576.0;
            if mb >= 1024.0 {
                format!("{:.2} GB", mb / 1024.0)
            } else {
                format!("{:.2} MB", mb)
            }
        })
    }
}

/// Sort key for catalog ranking
#[derive(Debug, Clone, Copy)]
struct RankKey {
    bucket: u8,
    short_side: u32,
    fps: f32,
    /// Renditions carrying both tracks beat split ones at equal quality
    muxed: bool,
    bitrate: f32,
    size: u64,
}

impl RankKey {
    fn of(format: &ManifestFormat, descriptor: &RenditionDescriptor) -> Self {
        Self {
            bucket: descriptor.category.rank(),
            short_side: descriptor.height.unwrap_or(0),
            fps: descriptor.frame_rate.unwrap_or(0.0),
            muxed: descriptor.has_video_track && descriptor.has_audio_track,
            bitrate: descriptor.bitrate_kbps.unwrap_or(0.0),
            size: format.filesize.or(format.filesize_approx).unwrap_or(0),
        }
    }

    fn quality_cmp(&self, other: &Self) -> Ordering {
        self.bucket
            .cmp(&other.bucket)
            .then(self.short_side.cmp(&other.short_side))
            .then(self.fps.total_cmp(&other.fps))
            .then(self.muxed.cmp(&other.muxed))
            .then(self.bitrate.total_cmp(&other.bitrate))
            .then(self.size.cmp(&other.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, ext: &str, w: u32, h: u32, fps: f32, tbr: f32) -> ManifestFormat {
        ManifestFormat {
            format_id: id.to_string(),
            ext: ext.to_string(),
            url: Some(format!("https://cdn.example/{}", id)),
            width: Some(w),
            height: Some(h),
            fps: Some(fps),
            vcodec: Some("avc1.640028".to_string()),
            acodec: Some("none".to_string()),
            filesize: Some(50_000_000),
            tbr: Some(tbr),
            ..Default::default()
        }
    }

    fn audio(id: &str, ext: &str, abr: f32) -> ManifestFormat {
        ManifestFormat {
            format_id: id.to_string(),
            ext: ext.to_string(),
            url: Some(format!("https://cdn.example/{}", id)),
            vcodec: Some("none".to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            abr: Some(abr),
            filesize: Some(3_000_000),
            ..Default::default()
        }
    }

    #[test]
    fn duplicate_labels_collapse_to_highest_ranked() {
        let formats = vec![
            video("299", "mp4", 1920, 1080, 60.0, 4000.0),
            video("299-drc", "mp4", 1920, 1080, 60.0, 4200.0),
        ];
        let renditions = FormatSelector::build_renditions(&formats);
        assert_eq!(renditions.len(), 1);
        assert_eq!(renditions[0].quality_label, "1080p60");
        assert_eq!(renditions[0].id, "299-drc");
    }

    #[test]
    fn same_label_different_container_is_kept() {
        let formats = vec![
            video("137", "mp4", 1920, 1080, 30.0, 4000.0),
            video("248", "webm", 1920, 1080, 30.0, 3000.0),
        ];
        let renditions = FormatSelector::build_renditions(&formats);
        assert_eq!(renditions.len(), 2);
    }

    #[test]
    fn no_two_renditions_share_label_and_container() {
        let mut formats = Vec::new();
        for (i, h) in [144u32, 240, 360, 480, 720, 1080, 1080, 720, 360].iter().enumerate() {
            formats.push(video(&i.to_string(), "mp4", h * 16 / 9, *h, 30.0, *h as f32));
        }
        formats.push(audio("140", "m4a", 129.5));
        formats.push(audio("140-dup", "m4a", 129.6));
        let renditions = FormatSelector::build_renditions(&formats);
        let mut keys = HashSet::new();
        for r in &renditions {
            assert!(keys.insert((r.quality_label.clone(), r.container.clone())));
        }
        assert_eq!(renditions.len(), 7);
    }

    #[test]
    fn filters_entries_without_locator_or_tracks() {
        let mut no_url = video("1", "mp4", 1280, 720, 30.0, 1000.0);
        no_url.url = None;
        let storyboard = ManifestFormat {
            format_id: "sb0".to_string(),
            ext: "mhtml".to_string(),
            url: Some("https://cdn.example/sb".to_string()),
            vcodec: Some("none".to_string()),
            acodec: Some("none".to_string()),
            ..Default::default()
        };
        let mut fragmented = video("2", "mp4", 854, 480, 30.0, 500.0);
        fragmented.url = None;
        fragmented.fragments = Some(vec![serde_json::json!({"path": "seg1"})]);

        let renditions = FormatSelector::build_renditions(&[no_url, storyboard, fragmented]);
        assert_eq!(renditions.len(), 1);
        assert_eq!(renditions[0].id, "2");
    }

    #[test]
    fn ordering_is_video_by_quality_then_audio_by_bitrate() {
        let formats = vec![
            audio("139", "m4a", 48.0),
            video("134", "mp4", 640, 360, 30.0, 300.0),
            video("401", "mp4", 3840, 2160, 60.0, 20000.0),
            audio("251", "webm", 160.0),
            video("136", "mp4", 1280, 720, 30.0, 1500.0),
        ];
        let ids: Vec<String> = FormatSelector::build_renditions(&formats)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["401", "136", "134", "251", "139"]);
    }

    #[test]
    fn categorizes_video_and_audio() {
        let formats = vec![
            video("401", "mp4", 3840, 2160, 30.0, 20000.0),
            video("271", "webm", 2560, 1440, 30.0, 9000.0),
            audio("774", "webm", 256.0),
            audio("x", "m4a", 0.0),
        ];
        let renditions = FormatSelector::build_renditions(&formats);
        let by_id = |id: &str| renditions.iter().find(|r| r.id == id).unwrap().category;
        assert_eq!(by_id("401"), QualityBucket::Uhd4k);
        assert_eq!(by_id("271"), QualityBucket::Hd);
        assert_eq!(by_id("774"), QualityBucket::Audio256);
        assert_eq!(by_id("x"), QualityBucket::AudioStandard);
    }

    #[test]
    fn portrait_video_uses_short_side() {
        let reel = video("dash-1080", "mp4", 1080, 1920, 30.0, 3000.0);
        let renditions = FormatSelector::build_renditions(&[reel]);
        assert_eq!(renditions[0].quality_label, "1080p");
        assert_eq!(renditions[0].category, QualityBucket::Hd);
    }

    #[test]
    fn infers_tracks_when_codecs_are_missing() {
        let progressive = ManifestFormat {
            format_id: "8".to_string(),
            ext: "mp4".to_string(),
            width: Some(720),
            height: Some(1280),
            ..Default::default()
        };
        assert_eq!(FormatSelector::track_layout(&progressive), (true, false));

        let bare_mp4 = ManifestFormat {
            format_id: "0".to_string(),
            ext: "mp4".to_string(),
            ..Default::default()
        };
        assert_eq!(FormatSelector::track_layout(&bare_mp4), (true, true));

        let m4a = ManifestFormat {
            format_id: "a".to_string(),
            ext: "m4a".to_string(),
            ..Default::default()
        };
        assert_eq!(FormatSelector::track_layout(&m4a), (false, true));
    }

    #[test]
    fn empty_manifest_is_no_renditions() {
        let err = FormatSelector::build_catalog(Manifest::default()).unwrap_err();
        assert!(matches!(err, DownloadError::NoRenditionsAvailable));
    }

    #[test]
    fn catalog_carries_metadata() {
        let manifest = Manifest {
            title: Some("Clip".to_string()),
            thumbnail: Some("https://i.example/t.jpg".to_string()),
            duration: Some(61.6),
            uploader: Some("someone".to_string()),
            formats: vec![video("22", "mp4", 1280, 720, 30.0, 1200.0)],
            ..Default::default()
        };
        let catalog = FormatSelector::build_catalog(manifest).unwrap();
        assert_eq!(catalog.title, "Clip");
        assert_eq!(catalog.duration_seconds, Some(62));
        assert_eq!(catalog.renditions[0].size.as_deref(), Some("47.68 MB"));
    }
}
