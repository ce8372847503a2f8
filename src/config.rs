//! Service configuration.
//!
//! Every setting has a default; environment variables (optionally from a
//! `.env` file) override them.

use std::path::PathBuf;
use std::time::Duration;

use crate::downloader::extractors::{
    ExtractorMode, DEFAULT_ADMISSION_TIMEOUT, DEFAULT_MAX_PROCESSES,
};
use crate::downloader::notifier::DEFAULT_PROGRESS_INTERVAL;
use crate::downloader::progress::DEFAULT_EVICTION_GRACE;
use crate::downloader::resolver::DEFAULT_RESOLVE_TIMEOUT;
use crate::downloader::source::default_allowed_hosts;
use crate::downloader::staging::DEFAULT_STAGED_FILE_TTL;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable permissive CORS
    pub enable_cors: bool,
    /// How yt-dlp is launched
    pub extractor_mode: ExtractorMode,
    /// Explicit yt-dlp binary, discovered when unset
    pub ytdlp_path: Option<String>,
    /// Interpreter for python mode
    pub python: String,
    pub resolve_timeout: Duration,
    pub staging_dir: PathBuf,
    /// Concurrent yt-dlp processes
    pub max_processes: usize,
    pub admission_timeout: Duration,
    /// Progress event cadence
    pub progress_interval: Duration,
    pub eviction_grace: Duration,
    /// Lifetime of a staged file nobody fetched
    pub staged_file_ttl: Duration,
    pub allowed_hosts: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            extractor_mode: ExtractorMode::default(),
            ytdlp_path: None,
            python: "python3".to_string(),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            staging_dir: default_staging_dir(),
            max_processes: DEFAULT_MAX_PROCESSES,
            admission_timeout: DEFAULT_ADMISSION_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            eviction_grace: DEFAULT_EVICTION_GRACE,
            staged_file_ttl: DEFAULT_STAGED_FILE_TTL,
            allowed_hosts: default_allowed_hosts(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("rendition-server")
        .join("staging")
}

impl AppConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS`, `API_PORT`, `ENABLE_CORS`
    /// - `YTDLP_MODE` ("cli" or "python"), `YTDLP_PATH`, `YTDLP_PYTHON`
    /// - `RESOLVE_TIMEOUT_SECS`, `ADMISSION_TIMEOUT_SECS`, `EVICTION_GRACE_SECS`,
    ///   `STAGED_FILE_TTL_SECS`, `PROGRESS_INTERVAL_MS`
    /// - `MAX_CONCURRENT_PROCESSES`, `STAGING_DIR`
    /// - `ALLOWED_HOSTS` (comma separated)
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env_or_default`](Self::from_env_or_default) with a
    /// custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str| {
            var(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        if let Some(bind_address) = var("API_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        if let Some(port) = var("API_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            config.port = port;
        }
        if let Some(enable) = var("ENABLE_CORS") {
            config.enable_cors = matches!(enable.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(mode) = var("YTDLP_MODE") {
            match mode.parse::<ExtractorMode>() {
                Ok(mode) => config.extractor_mode = mode,
                Err(e) => tracing::warn!(error = %e, "Ignoring YTDLP_MODE"),
            }
        }
        config.ytdlp_path = var("YTDLP_PATH");
        if let Some(python) = var("YTDLP_PYTHON") {
            config.python = python;
        }

        if let Some(timeout) = secs("RESOLVE_TIMEOUT_SECS") {
            config.resolve_timeout = timeout;
        }
        if let Some(timeout) = secs("ADMISSION_TIMEOUT_SECS") {
            config.admission_timeout = timeout;
        }
        if let Some(grace) = secs("EVICTION_GRACE_SECS") {
            config.eviction_grace = grace;
        }
        if let Some(ttl) = secs("STAGED_FILE_TTL_SECS") {
            config.staged_file_ttl = ttl;
        }
        if let Some(interval) = var("PROGRESS_INTERVAL_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            config.progress_interval = Duration::from_millis(interval.max(50));
        }
        if let Some(max) = var("MAX_CONCURRENT_PROCESSES").and_then(|v| v.trim().parse::<usize>().ok()) {
            config.max_processes = max.max(1);
        }
        if let Some(dir) = var("STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        if let Some(hosts) = var("ALLOWED_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
            if !hosts.is_empty() {
                config.allowed_hosts = hosts;
            }
        }

        config
    }

    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
