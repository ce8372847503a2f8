//! Source URL value object.

use url::Url;

use super::errors::DownloadError;

/// Domains accepted when no allow-list is configured.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &["youtube.com", "youtu.be", "instagram.com"];

/// A validated, user-supplied media URL.
///
/// Construction fails unless the URL parses, uses http(s) and its host is
/// one of the allowed domains or a subdomain of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference(Url);

impl SourceReference {
    pub fn parse(input: &str, allowed_hosts: &[String]) -> Result<Self, DownloadError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DownloadError::InvalidInput("URL is required".to_string()));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| DownloadError::InvalidInput(format!("Malformed URL: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidInput(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let host = url
            .host_str()
            .map(|h| h.trim_end_matches('.').to_lowercase())
            .ok_or_else(|| DownloadError::InvalidInput("URL has no host".to_string()))?;

        if !is_allowed_host(&host, allowed_hosts) {
            return Err(DownloadError::InvalidInput(format!(
                "Unsupported platform: {}",
                host
            )));
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }
}

fn is_allowed_host(host: &str, allowed_hosts: &[String]) -> bool {
    allowed_hosts.iter().any(|allowed| {
        let allowed = allowed.trim().trim_start_matches('.').to_lowercase();
        !allowed.is_empty()
            && (host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .map_or(false, |prefix| prefix.ends_with('.')))
    })
}

pub fn default_allowed_hosts() -> Vec<String> {
    DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<SourceReference, DownloadError> {
        SourceReference::parse(input, &default_allowed_hosts())
    }

    #[test]
    fn accepts_supported_platforms_and_subdomains() {
        assert!(parse("https://youtube.com/watch?v=abc").is_ok());
        assert!(parse("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(parse("https://m.youtube.com/watch?v=abc").is_ok());
        assert!(parse("https://youtu.be/abc").is_ok());
        assert!(parse("  https://www.instagram.com/p/xyz/  ").is_ok());
    }

    #[test]
    fn rejects_unsupported_hosts() {
        assert!(matches!(
            parse("https://example.com/video"),
            Err(DownloadError::InvalidInput(_))
        ));
        // suffix match must respect label boundaries
        assert!(parse("https://notyoutube.com/watch?v=abc").is_err());
        assert!(parse("https://youtube.com.evil.net/watch").is_err());
    }

    #[test]
    fn rejects_empty_and_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
        assert!(parse("youtube.com/watch?v=abc").is_err());
        assert!(parse("ftp://youtube.com/file").is_err());
    }

    #[test]
    fn custom_allow_list() {
        let hosts = vec!["vimeo.com".to_string()];
        assert!(SourceReference::parse("https://vimeo.com/1", &hosts).is_ok());
        assert!(SourceReference::parse("https://youtube.com/watch?v=a", &hosts).is_err());
    }
}
