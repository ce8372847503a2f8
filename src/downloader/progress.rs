// Process-wide progress store shared by the executor and the notifier

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::models::{JobKey, ProgressSnapshot, StagedArtifact, TransferStatus};

/// Default delay before a terminal record is evicted
pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct TrackedJob {
    snapshot: ProgressSnapshot,
    /// Bumped on every `begin`, so a stale eviction never removes a restart
    generation: u64,
}

/// Keyed job state.
///
/// One writer per key (the executor driving that job), any number of
/// readers. Each operation touches a single map shard; there are no
/// cross-job locks. Cloning is cheap and shares the same store.
#[derive(Clone)]
pub struct ProgressTracker {
    jobs: Arc<DashMap<JobKey, TrackedJob>>,
    /// source url -> most recently started job for that url
    latest: Arc<DashMap<String, JobKey>>,
    generation: Arc<AtomicU64>,
    eviction_grace: Duration,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_EVICTION_GRACE)
    }
}

impl ProgressTracker {
    pub fn new(eviction_grace: Duration) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            latest: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            eviction_grace,
        }
    }

    /// Start or restart a job at 0% / running.
    ///
    /// This is the only transition that lowers progress.
    pub fn begin(&self, key: &JobKey) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.jobs.insert(
            key.clone(),
            TrackedJob {
                snapshot: ProgressSnapshot {
                    progress: 0.0,
                    status: TransferStatus::Running,
                    artifact: None,
                    error: None,
                },
                generation,
            },
        );
        self.latest.insert(key.url().to_string(), key.clone());
        tracing::debug!(job = %key, generation, "Job started");
    }

    /// Record a new percentage. Ignored when lower than the current
    /// value, when the job is terminal, or when the job is unknown.
    pub fn set(&self, key: &JobKey, percent: f32) {
        if !percent.is_finite() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        if let Some(mut job) = self.jobs.get_mut(key) {
            let snapshot = &mut job.snapshot;
            if !snapshot.status.is_terminal() && percent > snapshot.progress {
                snapshot.progress = percent;
                snapshot.status = TransferStatus::Running;
            }
        }
    }

    /// Snapshot of a job, `{0, pending}` when absent.
    ///
    /// A key without rendition id resolves to the latest job for its url.
    pub fn get(&self, key: &JobKey) -> ProgressSnapshot {
        self.lookup(key).unwrap_or_else(ProgressSnapshot::pending)
    }

    pub fn lookup(&self, key: &JobKey) -> Option<ProgressSnapshot> {
        let resolved = self.resolve(key)?;
        self.jobs.get(&resolved).map(|job| job.snapshot.clone())
    }

    fn resolve(&self, key: &JobKey) -> Option<JobKey> {
        if key.is_url_only() {
            self.latest.get(key.url()).map(|entry| entry.value().clone())
        } else {
            Some(key.clone())
        }
    }

    pub fn complete(&self, key: &JobKey, artifact: Option<StagedArtifact>) {
        self.finish(key, |snapshot| {
            snapshot.progress = 100.0;
            snapshot.status = TransferStatus::Completed;
            snapshot.artifact = artifact;
        });
    }

    pub fn fail(&self, key: &JobKey, message: impl Into<String>) {
        let message = message.into();
        self.finish(key, |snapshot| {
            snapshot.status = TransferStatus::Failed;
            snapshot.error = Some(message);
        });
    }

    fn finish(&self, key: &JobKey, apply: impl FnOnce(&mut ProgressSnapshot)) {
        let generation = {
            let Some(mut job) = self.jobs.get_mut(key) else {
                return;
            };
            if job.snapshot.status.is_terminal() {
                return;
            }
            apply(&mut job.snapshot);
            tracing::debug!(job = %key, status = %job.snapshot.status, "Job finished");
            job.generation
        };
        self.schedule_eviction(key.clone(), generation);
    }

    fn schedule_eviction(&self, key: JobKey, generation: u64) {
        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tracker.eviction_grace).await;
            let removed = tracker
                .jobs
                .remove_if(&key, |_, job| job.generation == generation)
                .is_some();
            if removed {
                tracker.latest.remove_if(key.url(), |_, latest| *latest == key);
                tracing::debug!(job = %key, "Evicted terminal job");
            }
        });
    }

    /// Remove a job. Idempotent.
    pub fn clear(&self, key: &JobKey) {
        if let Some(resolved) = self.resolve(key) {
            self.jobs.remove(&resolved);
            self.latest
                .remove_if(resolved.url(), |_, latest| *latest == resolved);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
