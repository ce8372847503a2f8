// yt-dlp extractor - drives the native binary or `python3 -m yt_dlp`
//
// Every spawned process holds an admission permit for its whole lifetime,
// so resolve and transfer calls share one concurrency limit.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::process::{Command as StdCommand, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::diagnostics::first_error_line;
use super::traits::{
    ExtractorMode, Manifest, MediaExtractor, MediaProcess, MediaSelection, OutputTarget,
};
use crate::downloader::errors::DownloadError;
use crate::downloader::utils::{run_output_with_timeout, spawn_error};

/// Default number of concurrent extractor processes
pub const DEFAULT_MAX_PROCESSES: usize = 4;
/// Default time a request waits for a free process slot
pub const DEFAULT_ADMISSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Extractor backed by the yt-dlp command line
pub struct YtDlpExtractor {
    program: String,
    prefix_args: Vec<String>,
    mode: ExtractorMode,
    admission: Arc<Semaphore>,
    admission_timeout: Duration,
}

impl YtDlpExtractor {
    /// `binary` overrides binary discovery in CLI mode; `python` is the
    /// interpreter used in Python mode.
    pub fn new(mode: ExtractorMode, binary: Option<&str>, python: &str) -> Self {
        let (program, prefix_args) = match mode {
            ExtractorMode::Cli => (
                binary
                    .map(str::to_string)
                    .unwrap_or_else(Self::find_ytdlp),
                Vec::new(),
            ),
            ExtractorMode::Python => (
                python.to_string(),
                vec!["-m".to_string(), "yt_dlp".to_string()],
            ),
        };

        tracing::info!(%mode, program = %program, "Using yt-dlp extractor");

        Self {
            program,
            prefix_args,
            mode,
            admission: Arc::new(Semaphore::new(DEFAULT_MAX_PROCESSES)),
            admission_timeout: DEFAULT_ADMISSION_TIMEOUT,
        }
    }

    pub fn with_admission(mut self, max_processes: usize, wait: Duration) -> Self {
        self.admission = Arc::new(Semaphore::new(max_processes.max(1)));
        self.admission_timeout = wait;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn mode(&self) -> ExtractorMode {
        self.mode
    }

    /// Find yt-dlp binary
    fn find_ytdlp() -> String {
        let common_paths = [
            "/opt/homebrew/bin/yt-dlp",
            "/usr/local/bin/yt-dlp",
            "/usr/bin/yt-dlp",
        ];

        for path in common_paths {
            if std::path::Path::new(path).exists() {
                return path.to_string();
            }
        }

        if let Ok(output) = StdCommand::new("which").arg("yt-dlp").output() {
            if output.status.success() {
                if let Ok(path) = String::from_utf8(output.stdout) {
                    let trimmed = path.trim();
                    if !trimmed.is_empty() {
                        return trimmed.to_string();
                    }
                }
            }
        }

        "yt-dlp".to_string()
    }

    /// Wait for a process slot, giving up after the admission timeout
    async fn admit(&self) -> Result<OwnedSemaphorePermit, DownloadError> {
        match tokio::time::timeout(
            self.admission_timeout,
            self.admission.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(
                    wait_secs = self.admission_timeout.as_secs(),
                    "No free extractor slot"
                );
                Err(DownloadError::Busy)
            }
        }
    }

    fn full_args(&self, args: Vec<String>) -> Vec<String> {
        self.prefix_args.iter().cloned().chain(args).collect()
    }

    pub fn build_resolve_args(url: &str) -> Vec<String> {
        vec![
            "-J".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            url.to_string(),
        ]
    }

    pub fn build_transfer_args(selection: &MediaSelection) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            selection.selector.clone(),
            "--merge-output-format".to_string(),
            selection.merge_container.clone(),
            "--no-playlist".to_string(),
            "--no-part".to_string(),
            "--newline".to_string(),
            "--progress".to_string(),
            "-o".to_string(),
        ];

        match &selection.target {
            OutputTarget::Stdout => args.push("-".to_string()),
            OutputTarget::File(path) => args.push(path.to_string_lossy().into_owned()),
        }

        args.push(selection.url.clone());
        args
    }
}

/// Lines of a pipe, decoded lossily so a bad byte never stops the drain
fn line_stream<R>(reader: R) -> BoxStream<'static, String>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    stream::unfold(BufReader::new(reader), |mut reader| async move {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                Some((line, reader))
            }
        }
    })
    .boxed()
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        match self.mode {
            ExtractorMode::Cli => "cli-yt-dlp",
            ExtractorMode::Python => "python-yt-dlp",
        }
    }

    async fn resolve_manifest(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Manifest, DownloadError> {
        let _permit = self.admit().await?;
        let args = self.full_args(Self::build_resolve_args(url));
        tracing::debug!(program = %self.program, ?args, "Resolving manifest");

        let output = run_output_with_timeout(&self.program, args, timeout).await?;
        if !output.success {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                url,
                code = ?output.code,
                first_error = ?first_error_line(&stderr),
                stderr = %stderr,
                "Manifest resolution failed"
            );
            return Err(DownloadError::from_stderr(&stderr));
        }

        Manifest::from_json(&output.stdout)
    }

    async fn stream_media(&self, selection: MediaSelection) -> Result<MediaProcess, DownloadError> {
        let permit = self.admit().await?;
        let args = self.full_args(Self::build_transfer_args(&selection));
        tracing::debug!(program = %self.program, ?args, "Starting transfer process");

        let mut child = TokioCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::TransferFailed("Process has no stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::TransferFailed("Process has no stderr".to_string()))?;

        // Progress goes to stderr when media occupies stdout, stdout otherwise
        let (output, progress): (Box<dyn AsyncRead + Send + Unpin>, BoxStream<'static, String>) =
            match &selection.target {
                OutputTarget::Stdout => (Box::new(stdout) as Box<_>, line_stream(stderr)),
                OutputTarget::File(_) => (
                    Box::new(tokio::io::empty()) as Box<_>,
                    stream::select(line_stream(stdout), line_stream(stderr)).boxed(),
                ),
            };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            let _permit = permit;
            let code = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to wait for transfer process");
                        None
                    }
                },
                _ = token.cancelled() => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "Failed to kill transfer process");
                    }
                    None
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(MediaProcess {
            output,
            progress,
            exit: exit_rx,
            cancel,
        })
    }

    async fn version(&self) -> Option<String> {
        let args = self.full_args(vec!["--version".to_string()]);
        let output = run_output_with_timeout(&self.program, args, Duration::from_secs(10))
            .await
            .ok()?;
        output
            .success
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
