// Transfer executor - drives one download and keeps its progress current
//
// Direct mode pipes the tool's stdout into the response body. Staged mode
// writes into the staging area and hands back a one-shot download URL.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::extractors::diagnostics::first_error_line;
use super::extractors::{
    diagnose_error, MediaExtractor, MediaProcess, MediaSelection, OutputTarget,
};
use super::models::{DeliveryMode, JobKey, StagedArtifact, TransferRequest, TransferStatus};
use super::progress::ProgressTracker;
use super::source::SourceReference;
use super::staging::StagingArea;
use super::utils::{content_type_for, download_filename, normalize_container, ProgressAggregator};

/// Diagnostic lines kept for error classification
const DIAGNOSTIC_TAIL: usize = 20;
/// How long to wait for the progress pipes to drain after exit
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Media bytes ready to be sent as an attachment
pub struct MediaStream {
    pub filename: String,
    pub content_type: &'static str,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

/// Result of a staged transfer, also the POST response body
#[derive(Debug, Clone, Serialize)]
pub struct StagedTransfer {
    pub job_key: String,
    pub status: TransferStatus,
    #[serde(flatten)]
    pub artifact: StagedArtifact,
}

pub enum TransferOutcome {
    Stream(MediaStream),
    Staged(StagedTransfer),
}

/// Kills the transfer when dropped before it was disarmed
struct CancelOnDrop {
    token: CancellationToken,
    armed: bool,
}

impl CancelOnDrop {
    fn new(token: CancellationToken) -> Self {
        Self { token, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

pub struct TransferExecutor {
    extractor: Arc<dyn MediaExtractor>,
    tracker: ProgressTracker,
    staging: StagingArea,
    allowed_hosts: Vec<String>,
}

impl TransferExecutor {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        tracker: ProgressTracker,
        staging: StagingArea,
        allowed_hosts: Vec<String>,
    ) -> Self {
        Self {
            extractor,
            tracker,
            staging,
            allowed_hosts,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub async fn execute(&self, mut request: TransferRequest) -> Result<TransferOutcome, DownloadError> {
        let source = SourceReference::parse(&request.url, &self.allowed_hosts)?;
        validate_rendition_id(&request.rendition_id)?;
        request.url = source.as_str().to_string();
        request.container = normalize_container(&request.container);

        let key = request.job_key();
        tracing::info!(
            job = %key,
            container = %request.container,
            delivery = ?request.delivery,
            "Starting transfer"
        );
        self.tracker.begin(&key);

        let result = match request.delivery {
            DeliveryMode::Direct => self.execute_direct(&request, &key).await,
            DeliveryMode::Staged => self.execute_staged(&request, &key).await,
        };

        if let Err(e) = &result {
            tracing::warn!(job = %key, error = %e, "Transfer failed");
            self.tracker.fail(&key, e.client_message());
        }
        result
    }

    async fn execute_direct(
        &self,
        request: &TransferRequest,
        key: &JobKey,
    ) -> Result<TransferOutcome, DownloadError> {
        let process = self
            .extractor
            .stream_media(selection(request, OutputTarget::Stdout))
            .await?;

        let mut guard = CancelOnDrop::new(process.cancel.clone());
        let watcher = watch_progress(process.progress, self.tracker.clone(), key.clone());
        let supervisor = tokio::spawn(supervise(
            process.exit,
            watcher,
            self.tracker.clone(),
            key.clone(),
        ));

        // Headers are only committed once real bytes exist
        let mut reader = ReaderStream::new(process.output);
        let first = match reader.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(DownloadError::Io(e)),
            None => {
                guard.disarm();
                return match supervisor.await {
                    Ok(Ok(())) => Err(DownloadError::TransferFailed(
                        "Transfer produced no data".to_string(),
                    )),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(DownloadError::TransferFailed(e.to_string())),
                };
            }
        };

        // A failed exit after EOF ends the body with an error so the
        // response is aborted instead of looking complete
        let body = stream::once(async move { Ok(first) })
            .chain(stream::unfold(
                Some((reader, guard, supervisor)),
                |state| async move {
                    let (mut reader, mut guard, supervisor) = state?;
                    match reader.next().await {
                        Some(item) => Some((item, Some((reader, guard, supervisor)))),
                        None => {
                            guard.disarm();
                            let outcome = supervisor
                                .await
                                .unwrap_or_else(|e| Err(DownloadError::TransferFailed(e.to_string())));
                            match outcome {
                                Ok(()) => None,
                                Err(e) => Some((Err(io::Error::other(e.client_message())), None)),
                            }
                        }
                    }
                },
            ))
            .boxed();

        Ok(TransferOutcome::Stream(MediaStream {
            filename: download_filename(&request.container),
            content_type: content_type_for(&request.container),
            body,
        }))
    }

    async fn execute_staged(
        &self,
        request: &TransferRequest,
        key: &JobKey,
    ) -> Result<TransferOutcome, DownloadError> {
        let slot = self.staging.allocate(&request.container);
        let process = match self
            .extractor
            .stream_media(selection(request, OutputTarget::File(slot.output_template())))
            .await
        {
            Ok(process) => process,
            Err(e) => {
                self.staging.discard(&slot).await;
                return Err(e);
            }
        };

        let MediaProcess {
            progress,
            exit,
            cancel,
            ..
        } = process;
        let mut guard = CancelOnDrop::new(cancel);
        let watcher = watch_progress(progress, self.tracker.clone(), key.clone());
        let staging = self.staging.clone();
        let tracker = self.tracker.clone();
        let task_key = key.clone();

        // Runs to the end even when the request is dropped, so cleanup
        // always happens
        let finisher = tokio::spawn(async move {
            let code = exit.await.unwrap_or(None);
            let diagnostics = drain(watcher).await;
            match exit_result(code, &diagnostics) {
                Ok(()) => match staging.locate(&slot).await {
                    Ok(output) => {
                        let artifact = staging.register(&output);
                        tracker.complete(&task_key, Some(artifact.clone()));
                        tracing::info!(job = %task_key, file = %output.file_name(), "Staged transfer ready");
                        Ok(artifact)
                    }
                    Err(e) => {
                        staging.discard(&slot).await;
                        tracker.fail(&task_key, e.client_message());
                        Err(e)
                    }
                },
                Err(e) => {
                    staging.discard(&slot).await;
                    tracing::warn!(job = %task_key, error = %e, "Staged transfer ended with failure");
                    tracker.fail(&task_key, e.client_message());
                    Err(e)
                }
            }
        });

        let result = finisher
            .await
            .map_err(|e| DownloadError::TransferFailed(e.to_string()))?;
        guard.disarm();

        let artifact = result?;
        Ok(TransferOutcome::Staged(StagedTransfer {
            job_key: key.to_string(),
            status: TransferStatus::Completed,
            artifact,
        }))
    }
}

/// Token format of a rendition id, nothing that could alter the selector
fn validate_rendition_id(id: &str) -> Result<(), DownloadError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '='));
    if valid {
        Ok(())
    } else {
        Err(DownloadError::InvalidInput(
            "Invalid format_id".to_string(),
        ))
    }
}

/// A video-only rendition gets the best audio merged in; one that already
/// has audio is fetched as-is through the fallback.
pub fn merge_selector(rendition_id: &str) -> String {
    format!("{id}[acodec=none]+bestaudio/{id}", id = rendition_id)
}

fn selection(request: &TransferRequest, target: OutputTarget) -> MediaSelection {
    MediaSelection {
        url: request.url.clone(),
        selector: merge_selector(&request.rendition_id),
        merge_container: request.container.clone(),
        target,
    }
}

/// Feed progress lines into the tracker, return the last diagnostic lines
fn watch_progress(
    mut lines: BoxStream<'static, String>,
    tracker: ProgressTracker,
    key: JobKey,
) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut aggregator = ProgressAggregator::default();
        let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL);

        while let Some(line) = lines.next().await {
            if let Some(percent) = aggregator.feed(&line) {
                tracing::debug!(job = %key, percent, "Progress");
                tracker.set(&key, percent);
            } else if !line.trim().is_empty() && !line.starts_with("[download]") {
                if tail.len() == DIAGNOSTIC_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        tail.into_iter().collect::<Vec<_>>().join("\n")
    })
}

async fn drain(watcher: JoinHandle<String>) -> String {
    match tokio::time::timeout(DRAIN_TIMEOUT, watcher).await {
        Ok(Ok(diagnostics)) => diagnostics,
        _ => String::new(),
    }
}

fn exit_result(code: Option<i32>, diagnostics: &str) -> Result<(), DownloadError> {
    match code {
        Some(0) => Ok(()),
        None => Err(DownloadError::TransferFailed(
            "Transfer was cancelled".to_string(),
        )),
        Some(code) => {
            let reason = diagnose_error(diagnostics);
            tracing::warn!(
                code,
                ?reason,
                permanent = reason.is_permanent(),
                first_error = ?first_error_line(diagnostics),
                stderr = %diagnostics,
                "Transfer process exited abnormally"
            );
            Err(DownloadError::transfer_from_stderr(diagnostics))
        }
    }
}

/// Wait for a direct transfer to end and record the terminal state
async fn supervise(
    exit: oneshot::Receiver<Option<i32>>,
    watcher: JoinHandle<String>,
    tracker: ProgressTracker,
    key: JobKey,
) -> Result<(), DownloadError> {
    let code = exit.await.unwrap_or(None);
    let diagnostics = drain(watcher).await;
    let result = exit_result(code, &diagnostics);
    match &result {
        Ok(()) => {
            tracing::info!(job = %key, "Transfer completed");
            tracker.complete(&key, None);
        }
        Err(e) => {
            tracing::warn!(job = %key, error = %e, "Transfer ended with failure");
            tracker.fail(&key, e.client_message());
        }
    }
    result
}
