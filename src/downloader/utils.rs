// Helper functions shared by the extractor and executor

use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::errors::DownloadError;

/// Containers served with an audio MIME type and `audio.<ext>` filename
const AUDIO_CONTAINERS: &[&str] = &["m4a", "mp3", "opus", "ogg", "aac", "wav", "flac", "weba"];

/// Captured output of a finished process
#[derive(Debug)]
pub struct CapturedOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run a command to completion with a timeout.
///
/// The child is spawned with `kill_on_drop`, so dropping the returned
/// future (client went away) also terminates the process.
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    limit: Duration,
) -> Result<CapturedOutput, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::ToolNotFound(format!("no stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::ToolNotFound(format!("no stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(limit, child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task
                .await
                .map_err(|e| DownloadError::Io(std::io::Error::other(e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| DownloadError::Io(std::io::Error::other(e)))??;
            Ok(CapturedOutput {
                success: status.success(),
                code: status.code(),
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::UpstreamTimeout(limit.as_secs()))
        }
    }
}

/// Map a spawn failure, distinguishing a missing binary
pub fn spawn_error(program: &str, e: std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(program.to_string())
    } else {
        DownloadError::Io(e)
    }
}

/// One interesting line of yt-dlp progress output
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// "[info] abc: Downloading 1 format(s): 137+140"
    Formats(usize),
    /// "[download] Destination: ..." - a new part starts
    Destination,
    /// "[download]  12.5% of ..."
    Percent(f32),
    /// "[Merger] Merging formats into ..."
    Merging,
    /// "... has already been downloaded"
    AlreadyDownloaded,
}

/// Parse yt-dlp progress line like:
/// [download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32 (frag 29/454)
pub fn parse_ytdlp_progress(line: &str) -> Option<ProgressLine> {
    lazy_static::lazy_static! {
        static ref PROGRESS_RE: Regex = Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").unwrap();
        static ref FORMATS_RE: Regex =
            Regex::new(r"\[info\].*Downloading \d+ format\(s\):\s*(\S+)").unwrap();
        static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
        static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
        static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        return Some(ProgressLine::Percent(percent.clamp(0.0, 100.0)));
    }

    if let Some(caps) = FORMATS_RE.captures(line) {
        let parts = caps.get(1)?.as_str().split('+').count();
        return Some(ProgressLine::Formats(parts.max(1)));
    }

    if DEST_RE.is_match(line) {
        return Some(ProgressLine::Destination);
    }

    if MERGE_RE.is_match(line) {
        return Some(ProgressLine::Merging);
    }

    if ALREADY_RE.is_match(line) {
        return Some(ProgressLine::AlreadyDownloaded);
    }

    None
}

/// Folds per-part percentages into one overall 0-99 value.
///
/// A merged download prints two 0-100% runs (video then audio). Each part
/// gets an equal share of the scale; 100 is reserved for a clean exit.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    parts: usize,
    current: usize,
    seen_destination: bool,
    overall: f32,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self {
            parts: 1,
            current: 0,
            seen_destination: false,
            overall: 0.0,
        }
    }
}

impl ProgressAggregator {
    pub const CEILING: f32 = 99.0;

    /// Feed one output line, returns the new overall percent when it moved
    pub fn feed(&mut self, line: &str) -> Option<f32> {
        let candidate = match parse_ytdlp_progress(line)? {
            ProgressLine::Formats(parts) => {
                self.parts = parts;
                return None;
            }
            ProgressLine::Destination => {
                if self.seen_destination {
                    self.current = (self.current + 1).min(self.parts - 1);
                }
                self.seen_destination = true;
                return None;
            }
            ProgressLine::Percent(pct) => {
                let share = 100.0 / self.parts as f32;
                self.current as f32 * share + pct / 100.0 * share
            }
            ProgressLine::Merging | ProgressLine::AlreadyDownloaded => Self::CEILING,
        };

        let candidate = candidate.min(Self::CEILING);
        if candidate > self.overall {
            self.overall = candidate;
            Some(candidate)
        } else {
            None
        }
    }

    pub fn overall(&self) -> f32 {
        self.overall
    }
}

pub fn is_audio_container(ext: &str) -> bool {
    AUDIO_CONTAINERS.contains(&ext.to_lowercase().as_str())
}

/// MIME type for a container extension
pub fn content_type_for(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" => "audio/ogg",
        "weba" => "audio/webm",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// Attachment filename for a container, e.g. "video.mp4"
pub fn download_filename(ext: &str) -> String {
    let ext = normalize_container(ext);
    if is_audio_container(&ext) {
        format!("audio.{}", ext)
    } else {
        format!("video.{}", ext)
    }
}

/// Lowercase alphanumeric extension, "mp4" when empty or unsafe
pub fn normalize_container(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        "mp4".to_string()
    } else {
        ext
    }
}
