//! Upload Tracker - concurrent file uploads with per-job status
//!
//! Every selected file becomes an independent job running on its own task.
//! A job moves exactly once from `Uploading` to a terminal state, stays
//! visible for a fixed interval so the user sees the outcome, then is
//! evicted. Eviction only affects visibility, never delivered data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ChatBackend, ProgressFn, UploadFile, UploadReceipt};
use crate::config::UploadConfig;
use crate::core::types::new_id;
use crate::identity::IdentityProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Uploading,
    Success,
    Error,
    /// Cancelled by the user; not an error
    Aborted,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Uploading)
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("No user identity available")]
    NoIdentity,

    #[error("Upload aborted")]
    Aborted,

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A visible upload entry
#[derive(Debug, Clone, PartialEq)]
pub struct UploadJob {
    pub id: String,
    pub file_name: String,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub receipt: Option<UploadReceipt>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    seq: u64,
}

impl UploadJob {
    /// Fraction uploaded in `0.0..=1.0`
    pub fn progress(&self) -> f32 {
        if self.total_bytes == 0 {
            return if self.status == UploadStatus::Success { 1.0 } else { 0.0 };
        }
        (self.bytes_sent as f32 / self.total_bytes as f32).clamp(0.0, 1.0)
    }
}

/// Job state changes, in the order they happen per job
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Started { job_id: String, file_name: String },
    Progress { job_id: String, bytes_sent: u64, total_bytes: u64 },
    Finished { job_id: String, status: UploadStatus, error: Option<String> },
    Evicted { job_id: String },
}

struct TrackerInner {
    backend: Arc<dyn ChatBackend>,
    identity: Arc<dyn IdentityProvider>,
    jobs: DashMap<String, UploadJob>,
    tokens: DashMap<String, CancellationToken>,
    seq: AtomicU64,
    display_for: Duration,
    max_file_bytes: u64,
    event_tx: Option<mpsc::UnboundedSender<UploadEvent>>,
    changed: Notify,
}

/// Handle to the upload job set; cheap to clone
#[derive(Clone)]
pub struct UploadTracker {
    inner: Arc<TrackerInner>,
}

impl UploadTracker {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: &UploadConfig,
    ) -> Self {
        Self::build(backend, identity, config, None)
    }

    /// Tracker that publishes [`UploadEvent`]s
    pub fn with_events(
        backend: Arc<dyn ChatBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: &UploadConfig,
        event_tx: mpsc::UnboundedSender<UploadEvent>,
    ) -> Self {
        Self::build(backend, identity, config, Some(event_tx))
    }

    fn build(
        backend: Arc<dyn ChatBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: &UploadConfig,
        event_tx: Option<mpsc::UnboundedSender<UploadEvent>>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                backend,
                identity,
                jobs: DashMap::new(),
                tokens: DashMap::new(),
                seq: AtomicU64::new(0),
                display_for: config.display_for(),
                max_file_bytes: config.max_file_bytes,
                event_tx,
                changed: Notify::new(),
            }),
        }
    }

    /// Start uploading one file; returns the job id immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, file: UploadFile) -> String {
        let job_id = new_id();
        let job = UploadJob {
            id: job_id.clone(),
            file_name: file.file_name.clone(),
            status: UploadStatus::Uploading,
            error: None,
            bytes_sent: 0,
            total_bytes: file.size(),
            receipt: None,
            started_at: Utc::now(),
            finished_at: None,
            seq: self.inner.seq.fetch_add(1, Ordering::SeqCst),
        };
        let token = CancellationToken::new();
        self.inner.jobs.insert(job_id.clone(), job);
        self.inner.tokens.insert(job_id.clone(), token.clone());
        self.inner.emit(UploadEvent::Started {
            job_id: job_id.clone(),
            file_name: file.file_name.clone(),
        });
        tracing::info!(job_id = %job_id, file = %file.file_name, "upload started");

        let inner = self.inner.clone();
        let task_job_id = job_id.clone();
        tokio::spawn(async move {
            let outcome = inner.run(&task_job_id, file, token).await;
            inner.finish(&task_job_id, outcome);
            tokio::time::sleep(inner.display_for).await;
            inner.evict(&task_job_id);
        });

        job_id
    }

    /// Start one independent job per file
    pub fn start_many(&self, files: impl IntoIterator<Item = UploadFile>) -> Vec<String> {
        files.into_iter().map(|file| self.start(file)).collect()
    }

    /// Abort an in-flight job; returns false if it already finished
    pub fn cancel(&self, job_id: &str) -> bool {
        let uploading = self
            .inner
            .jobs
            .get(job_id)
            .is_some_and(|job| job.status == UploadStatus::Uploading);
        if !uploading {
            return false;
        }
        let token = self.inner.tokens.get(job_id).map(|t| t.clone());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.inner.tokens.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Visible jobs in start order
    pub fn jobs(&self) -> Vec<UploadJob> {
        let mut jobs: Vec<UploadJob> = self.inner.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    pub fn job(&self, job_id: &str) -> Option<UploadJob> {
        self.inner.jobs.get(job_id).map(|job| job.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.jobs.is_empty()
    }

    /// Number of jobs still uploading
    pub fn active_count(&self) -> usize {
        self.inner
            .jobs
            .iter()
            .filter(|job| job.status == UploadStatus::Uploading)
            .count()
    }

    /// Wait until no job is uploading
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.changed.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait until every job has been evicted
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.inner.changed.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl TrackerInner {
    fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    async fn run(
        self: &Arc<Self>,
        job_id: &str,
        file: UploadFile,
        token: CancellationToken,
    ) -> Result<UploadReceipt, UploadError> {
        if file.size() > self.max_file_bytes {
            return Err(UploadError::TooLarge {
                size: file.size(),
                max: self.max_file_bytes,
            });
        }
        let user_id = self.identity.user_id().ok_or(UploadError::NoIdentity)?;

        let progress: ProgressFn = {
            let inner = Arc::clone(self);
            let job_id = job_id.to_string();
            Arc::new(move |sent, total| inner.record_progress(&job_id, sent, total))
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(UploadError::Aborted),
            result = self.backend.upload(file, &user_id, progress) => {
                result.map_err(UploadError::from)
            }
        }
    }

    fn record_progress(&self, job_id: &str, bytes_sent: u64, total_bytes: u64) {
        let updated = match self.jobs.get_mut(job_id) {
            Some(mut job) if job.status == UploadStatus::Uploading => {
                job.bytes_sent = bytes_sent;
                job.total_bytes = total_bytes;
                true
            }
            _ => false,
        };
        if updated {
            self.emit(UploadEvent::Progress {
                job_id: job_id.to_string(),
                bytes_sent,
                total_bytes,
            });
        }
    }

    /// Apply the terminal status; a job never leaves a terminal state
    fn finish(&self, job_id: &str, outcome: Result<UploadReceipt, UploadError>) {
        self.tokens.remove(job_id);
        let (status, error) = match &outcome {
            Ok(_) => (UploadStatus::Success, None),
            Err(UploadError::Aborted) => (UploadStatus::Aborted, None),
            Err(e) => (UploadStatus::Error, Some(e.to_string())),
        };

        let applied = match self.jobs.get_mut(job_id) {
            Some(mut job) if job.status == UploadStatus::Uploading => {
                job.status = status;
                job.error = error.clone();
                job.finished_at = Some(Utc::now());
                if let Ok(receipt) = outcome {
                    job.bytes_sent = job.total_bytes;
                    job.receipt = Some(receipt);
                }
                true
            }
            _ => false,
        };

        if applied {
            match &error {
                Some(e) => tracing::warn!(job_id, error = %e, "upload failed"),
                None => tracing::info!(job_id, ?status, "upload finished"),
            }
            self.emit(UploadEvent::Finished {
                job_id: job_id.to_string(),
                status,
                error,
            });
        }
        self.changed.notify_waiters();
    }

    fn evict(&self, job_id: &str) {
        if self.jobs.remove(job_id).is_some() {
            tracing::debug!(job_id, "upload job evicted");
            self.emit(UploadEvent::Evicted {
                job_id: job_id.to_string(),
            });
        }
        self.changed.notify_waiters();
    }
}
