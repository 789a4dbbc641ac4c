//! In-memory tracking of background generation jobs.
//!
//! A job is created when a streaming request starts and is mutated only by
//! the task that owns it. Clients that lose their event stream poll the
//! tracker instead. Jobs are evicted by a periodic sweep once they have not
//! been updated for `max_age`.

pub mod store;

pub use store::{InMemoryJobStore, JobMutation, JobStore};

use crate::audio::AudioResult;
use crate::error::Result;
use crate::progress::{ProgressEvent, Stage};
use crate::script::GeneratedScript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Highest progress a job can report before it is complete.
const MAX_RUNNING_PROGRESS: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Audio,
    Pipeline,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Audio => write!(f, "audio"),
            JobKind::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Payload of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    Pipeline {
        script: GeneratedScript,
        audio: AudioResult,
    },
    Audio(AudioResult),
}

impl JobResult {
    pub fn audio(&self) -> &AudioResult {
        match self {
            JobResult::Pipeline { audio, .. } => audio,
            JobResult::Audio(audio) => audio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: Stage,
    pub progress: u8,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl Job {
    fn new(kind: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: Stage::Starting,
            progress: 0,
            message: None,
            created_at: now,
            last_update_at: now,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The poll-endpoint view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub kind: JobKind,
    pub status: Stage,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_complete: bool,
}

impl From<Job> for JobSnapshot {
    fn from(job: Job) -> Self {
        let is_complete = job.is_complete();
        Self {
            id: job.id,
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            message: job.message,
            start_time: job.created_at,
            last_update: job.last_update_at,
            completed_at: job.completed_at,
            result: job.result,
            error: job.error,
            is_complete,
        }
    }
}

/// One event on a job's live stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub stage: Stage,
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub fn progress(job_id: &str, event: &ProgressEvent) -> Self {
        Self {
            stage: event.stage,
            job_id: job_id.to_string(),
            progress: Some(event.progress),
            message: Some(event.message.clone()),
            current: event.current,
            total: event.total,
            result: None,
            error: None,
        }
    }

    pub fn complete(job_id: &str, result: JobResult) -> Self {
        Self {
            stage: Stage::Complete,
            job_id: job_id.to_string(),
            progress: Some(100),
            message: Some("Complete".to_string()),
            current: None,
            total: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(job_id: &str, error: impl Into<String>) -> Self {
        Self {
            stage: Stage::Error,
            job_id: job_id.to_string(),
            progress: None,
            message: None,
            current: None,
            total: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// A non-terminal change to a running job.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<Stage>,
    pub progress: Option<u8>,
    pub message: Option<String>,
}

/// Creates, updates, serves and evicts jobs.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStore>,
    max_age: chrono::Duration,
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStore>, max_age: Duration) -> Self {
        Self {
            store,
            max_age: chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::minutes(30)),
        }
    }

    /// In-memory tracker evicting jobs idle for 30 minutes.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryJobStore::default()),
            Duration::from_secs(30 * 60),
        )
    }

    pub async fn create_job(&self, kind: JobKind) -> String {
        let job = Job::new(kind, Utc::now());
        let id = job.id.clone();
        self.store.put(job).await;
        debug!("Created {} job {}", kind, id);
        id
    }

    /// Apply a progress change. Progress never decreases and terminal jobs are
    /// left untouched. Returns false if the job is unknown or already finished.
    pub async fn update_job(&self, id: &str, update: JobUpdate) -> bool {
        self.store
            .update(
                id,
                Box::new(move |job| {
                    if job.is_complete() {
                        return false;
                    }
                    if let Some(status) = update.status.filter(|s| !s.is_terminal()) {
                        job.status = status;
                    }
                    if let Some(progress) = update.progress {
                        job.progress = job.progress.max(progress.min(MAX_RUNNING_PROGRESS));
                    }
                    if update.message.is_some() {
                        job.message = update.message;
                    }
                    job.last_update_at = Utc::now();
                    true
                }),
            )
            .await
    }

    /// Record a component progress event.
    ///
    /// A component's own `complete` event only advances progress; the job
    /// becomes terminal through [`complete`](Self::complete) or
    /// [`fail`](Self::fail).
    pub async fn record_progress(&self, id: &str, event: &ProgressEvent) -> bool {
        self.update_job(
            id,
            JobUpdate {
                status: Some(event.stage),
                progress: Some(event.progress),
                message: Some(event.message.clone()),
            },
        )
        .await
    }

    pub async fn complete(&self, id: &str, result: JobResult) -> bool {
        self.finish(id, |job| {
            job.status = Stage::Complete;
            job.progress = 100;
            job.message = Some("Complete".to_string());
            job.result = Some(result);
        })
        .await
    }

    pub async fn fail(&self, id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.finish(id, |job| {
            job.status = Stage::Error;
            job.message = Some(error.clone());
            job.error = Some(error);
        })
        .await
    }

    async fn finish(&self, id: &str, apply: impl FnOnce(&mut Job) + Send + 'static) -> bool {
        self.store
            .update(
                id,
                Box::new(move |job| {
                    if job.is_complete() {
                        warn!("Ignoring second terminal update for job {}", id);
                        return false;
                    }
                    apply(job);
                    let now = Utc::now();
                    job.last_update_at = now;
                    job.completed_at = Some(now);
                    info!("Job {} finished with status {}", id, job.status);
                    true
                }),
            )
            .await
    }

    pub async fn get_job(&self, id: &str) -> Option<JobSnapshot> {
        self.store.get(id).await.map(JobSnapshot::from)
    }

    /// Remove jobs whose last update is older than `max_age` before `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.store.remove_updated_before(now - self.max_age).await;
        if removed > 0 {
            info!("Evicted {} stale jobs", removed);
        }
        removed
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep on a fixed interval for the life of the process.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.sweep().await;
            }
        })
    }

    /// Run `work` as a detached job and return its id plus a live event stream.
    ///
    /// `work` receives the sink it should report progress into. The job keeps
    /// running if the returned receiver is dropped; its final state stays
    /// available through [`get_job`](Self::get_job).
    pub async fn spawn<F, Fut>(&self, kind: JobKind, work: F) -> (String, UnboundedReceiver<JobEvent>)
    where
        F: FnOnce(UnboundedSender<ProgressEvent>) -> Fut,
        Fut: Future<Output = Result<JobResult>> + Send + 'static,
    {
        let id = self.create_job(kind).await;
        let (progress_tx, mut progress_rx) = unbounded_channel::<ProgressEvent>();
        let (client_tx, client_rx) = unbounded_channel::<JobEvent>();

        let _ = client_tx.send(JobEvent::progress(
            &id,
            &ProgressEvent::new(Stage::Starting, 0, format!("Starting {} job", kind)),
        ));

        let work = work(progress_tx);
        let tracker = self.clone();
        let job_id = id.clone();

        tokio::spawn(async move {
            let forward = async {
                while let Some(event) = progress_rx.recv().await {
                    tracker.record_progress(&job_id, &event).await;
                    if !event.stage.is_terminal() {
                        let _ = client_tx.send(JobEvent::progress(&job_id, &event));
                    }
                }
            };
            let (outcome, ()) = tokio::join!(work, forward);

            match outcome {
                Ok(result) => {
                    tracker.complete(&job_id, result.clone()).await;
                    let _ = client_tx.send(JobEvent::complete(&job_id, result));
                }
                Err(e) => {
                    warn!("Job {} failed: {}", job_id, e);
                    tracker.fail(&job_id, e.to_string()).await;
                    let _ = client_tx.send(JobEvent::error(&job_id, e.to_string()));
                }
            }
        });

        (id, client_rx)
    }
}
