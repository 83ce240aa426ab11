//! In-process reliable job queue with per-job identity.
//!
//! Jobs are keyed by id: enqueueing an id that is still waiting replaces its payload instead
//! of scheduling a second delivery. Delivery is at-least-once, so handlers must tolerate
//! seeing a job they already finished. Finished jobs that are kept stay inspectable until
//! the retention limit evicts the oldest.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::errors::AppError;

/// Finished jobs kept for inspection when a queue is built with [`LocalQueue::new`].
pub const DEFAULT_FINISHED_RETENTION: usize = 1000;

/// Retention policy for finished jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: String,
    pub payload: Value,
    pub options: JobOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        job_id: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<(), AppError>;
}

/// Worker callback invoked once per delivery.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &QueuedJob) -> Result<(), AppError>;
}

struct JobEntry {
    job: QueuedJob,
    state: JobState,
}

#[derive(Default)]
struct JobTable {
    entries: HashMap<String, JobEntry>,
    /// Ids of retained finished entries, oldest first
    finished: VecDeque<String>,
}

impl JobTable {
    fn get(&self, job_id: &str) -> Option<&JobEntry> {
        self.entries.get(job_id)
    }

    fn get_mut(&mut self, job_id: &str) -> Option<&mut JobEntry> {
        self.entries.get_mut(job_id)
    }

    fn insert(&mut self, job_id: &str, entry: JobEntry) {
        if self.entries.insert(job_id.to_string(), entry).is_some() {
            self.finished.retain(|id| id != job_id);
        }
    }

    fn remove(&mut self, job_id: &str) {
        self.entries.remove(job_id);
    }

    /// Mark an active job finished and keep it, evicting the oldest finished jobs over `limit`.
    fn retire(&mut self, job_id: &str, state: JobState, limit: usize) {
        if let Some(entry) = self.entries.get_mut(job_id) {
            entry.state = state;
            self.finished.push_back(job_id.to_string());
        }
        while self.finished.len() > limit {
            if let Some(oldest) = self.finished.pop_front() {
                tracing::debug!("Evicting finished job {}", oldest);
                self.entries.remove(&oldest);
            }
        }
    }
}

struct QueueState {
    jobs: Mutex<JobTable>,
    finished_retention: usize,
}

#[derive(Clone)]
pub struct LocalQueue {
    state: Arc<QueueState>,
    sender: mpsc::UnboundedSender<String>,
}

/// Consumer half of a [`LocalQueue`]; hand it to [`spawn_workers`].
pub struct JobReceiver {
    state: Arc<QueueState>,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl LocalQueue {
    pub fn new() -> (Self, JobReceiver) {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }

    /// A queue that keeps at most `finished_retention` completed or failed jobs.
    pub fn with_retention(finished_retention: usize) -> (Self, JobReceiver) {
        let state = Arc::new(QueueState {
            jobs: Mutex::new(JobTable::default()),
            finished_retention,
        });
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                state: state.clone(),
                sender,
            },
            JobReceiver { state, receiver },
        )
    }

    /// Current state of a job, `None` once it was removed or never existed.
    pub async fn job_state(&self, job_id: &str) -> Option<JobState> {
        self.state
            .jobs
            .lock()
            .await
            .get(job_id)
            .map(|entry| entry.state)
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn enqueue(
        &self,
        job_id: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<(), AppError> {
        let mut jobs = self.state.jobs.lock().await;
        let job = QueuedJob {
            job_id: job_id.to_string(),
            payload,
            options,
        };

        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.state == JobState::Waiting {
                tracing::debug!("Job {} already waiting, payload replaced", job_id);
                entry.job = job;
                return Ok(());
            }
        }

        jobs.insert(
            job_id,
            JobEntry {
                job,
                state: JobState::Waiting,
            },
        );
        self.sender
            .send(job_id.to_string())
            .map_err(|_| AppError::Internal("Job queue is closed".to_string()))?;
        Ok(())
    }
}

/// Drain the queue with at most `concurrency` jobs running at once.
pub fn spawn_workers(
    mut receiver: JobReceiver,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    tokio::spawn(async move {
        while let Some(job_id) = receiver.receiver.recv().await {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let job = {
                let mut jobs = receiver.state.jobs.lock().await;
                match jobs.get_mut(&job_id) {
                    Some(entry) if entry.state == JobState::Waiting => {
                        entry.state = JobState::Active;
                        entry.job.clone()
                    }
                    _ => continue,
                }
            };

            let state = receiver.state.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let outcome = handler.execute(&job).await;
                let mut jobs = state.jobs.lock().await;
                let retention = state.finished_retention;

                // A re-enqueue while running already owns the entry
                let still_ours = matches!(
                    jobs.get(&job.job_id),
                    Some(entry) if entry.state == JobState::Active
                );
                if still_ours {
                    match outcome {
                        Ok(()) if job.options.remove_on_complete => {
                            jobs.remove(&job.job_id);
                        }
                        Err(_) if job.options.remove_on_fail => {
                            jobs.remove(&job.job_id);
                        }
                        Ok(()) => {
                            jobs.retire(&job.job_id, JobState::Completed, retention);
                        }
                        Err(ref e) => {
                            tracing::warn!("Job {} failed: {}", job.job_id, e);
                            jobs.retire(&job.job_id, JobState::Failed, retention);
                        }
                    }
                }
                drop(permit);
            });
        }
        tracing::info!("Job queue closed, worker pool stopping");
    })
}
