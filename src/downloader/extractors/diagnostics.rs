// Failure diagnostics - classifies yt-dlp stderr
//
// Raw stderr may contain cookies, local paths or signed media URLs, so the
// HTTP layer only ever sees the reason's fixed user message. The full text
// stays in the server log.

use serde::Serialize;

/// Why an extraction or transfer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// DRM, Premium-only or paid content
    DrmProtected,
    /// Channel membership required
    MembersOnly,
    /// Login required to confirm age
    AgeRestricted,
    PrivateVideo,
    /// Removed, deleted or never existed
    VideoUnavailable,
    GeoBlocked,
    /// HTTP 429 or similar throttling
    RateLimited,
    /// Bot detection / PO token / SABR protections
    BotDetection,
    /// HTTP 403 without a more specific hint
    Forbidden,
    NetworkTimeout,
    /// The extractor has no handler for the URL
    UnsupportedUrl,
    /// Requested format id does not exist for this media
    FormatUnavailable,
    /// ffmpeg missing or merge step failed
    MergeFailed,
    Unknown,
}

impl FailureReason {
    /// Short message that is safe to return to clients
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::DrmProtected => "This content is DRM-protected and cannot be downloaded",
            Self::MembersOnly => "This video is only available to channel members",
            Self::AgeRestricted => "This video is age-restricted",
            Self::PrivateVideo => "This video is private",
            Self::VideoUnavailable => "This video is unavailable",
            Self::GeoBlocked => "This video is not available in the server's region",
            Self::RateLimited => "The platform is rate limiting requests, try again later",
            Self::BotDetection => "The platform blocked the request, try again later",
            Self::Forbidden => "Access to the media was denied",
            Self::NetworkTimeout => "The platform did not respond in time",
            Self::UnsupportedUrl => "This URL is not supported",
            Self::FormatUnavailable => "The requested format is not available",
            Self::MergeFailed => "Failed to merge audio and video",
            Self::Unknown => "Failed to process the media",
        }
    }

    /// No retry with the same input can succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::DrmProtected
                | Self::VideoUnavailable
                | Self::PrivateVideo
                | Self::UnsupportedUrl
                | Self::FormatUnavailable
        )
    }
}

/// Classify an error text. Checks run from most to least specific.
pub fn diagnose_error(error: &str) -> FailureReason {
    let lower = error.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&[
        "drm",
        "widevine",
        "playready",
        "fairplay",
        "youtube premium",
        "requires purchase",
        "rental",
        "this video requires payment",
    ]) {
        return FailureReason::DrmProtected;
    }

    if has(&["members only", "members-only", "join this channel", "available to members"]) {
        return FailureReason::MembersOnly;
    }

    if has(&["age-restricted", "sign in to confirm your age", "age_verification"]) {
        return FailureReason::AgeRestricted;
    }

    if has(&["private video", "video is private", "granted access"]) {
        return FailureReason::PrivateVideo;
    }

    if has(&[
        "video unavailable",
        "video has been removed",
        "no longer available",
        "video is unavailable",
        "http error 404",
    ]) {
        return FailureReason::VideoUnavailable;
    }

    if has(&["unsupported url", "is not a valid url"]) {
        return FailureReason::UnsupportedUrl;
    }

    if has(&["requested format is not available", "requested format not available"]) {
        return FailureReason::FormatUnavailable;
    }

    if has(&["not available in your country", "blocked in your country", "geo restrict"]) {
        return FailureReason::GeoBlocked;
    }

    if has(&["429", "rate limit", "too many requests"]) {
        return FailureReason::RateLimited;
    }

    if has(&[
        "sign in to confirm you",
        "captcha",
        "unusual traffic",
        "po token",
        "sabr",
    ]) {
        return FailureReason::BotDetection;
    }

    if has(&["403", "forbidden"]) {
        return FailureReason::Forbidden;
    }

    if has(&["ffmpeg", "postprocessing", "merger"]) {
        return FailureReason::MergeFailed;
    }

    if has(&[
        "timeout",
        "timed out",
        "connection refused",
        "network unreachable",
        "temporary failure in name resolution",
    ]) {
        return FailureReason::NetworkTimeout;
    }

    FailureReason::Unknown
}

/// First `ERROR:` line of stderr, for log context
pub fn first_error_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("ERROR:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_detection() {
        let error = "ERROR: unable to download video data: HTTP Error 403: Forbidden";
        assert_eq!(diagnose_error(error), FailureReason::Forbidden);
    }

    #[test]
    fn test_bot_detection() {
        let error = "ERROR: [youtube] abc: Sign in to confirm you're not a bot";
        assert_eq!(diagnose_error(error), FailureReason::BotDetection);
    }

    #[test]
    fn test_age_restricted_detection() {
        let error = "Sign in to confirm your age";
        assert_eq!(diagnose_error(error), FailureReason::AgeRestricted);
    }

    #[test]
    fn test_unavailable_detection() {
        let error = "ERROR: [youtube] abc: Video unavailable";
        assert_eq!(diagnose_error(error), FailureReason::VideoUnavailable);
        assert!(FailureReason::VideoUnavailable.is_permanent());
    }

    #[test]
    fn test_format_unavailable_detection() {
        let error = "ERROR: [youtube] abc: Requested format is not available. Use --list-formats";
        assert_eq!(diagnose_error(error), FailureReason::FormatUnavailable);
    }

    #[test]
    fn test_timeout_detection() {
        assert_eq!(diagnose_error("Timed out after 60s"), FailureReason::NetworkTimeout);
    }

    #[test]
    fn test_drm_detection() {
        let error = "This video is DRM protected";
        assert_eq!(diagnose_error(error), FailureReason::DrmProtected);
    }

    #[test]
    fn test_unknown_is_default() {
        assert_eq!(diagnose_error(""), FailureReason::Unknown);
        assert_eq!(diagnose_error("something odd"), FailureReason::Unknown);
        assert!(!FailureReason::Unknown.is_permanent());
    }

    #[test]
    fn test_first_error_line() {
        let stderr = "WARNING: [youtube] slow\nERROR: [youtube] abc: Private video\nmore";
        assert_eq!(
            first_error_line(stderr),
            Some("ERROR: [youtube] abc: Private video")
        );
        assert_eq!(first_error_line("WARNING: only"), None);
    }
}
