//! Job registry: owns all job records and enforces the state machine.
//!
//! The registry is the single writer for job state. Every status change goes
//! through a transition method that rejects unreachable states with
//! [`RegistryError::InvalidTransition`], keeping transitions monotonic.
//! Terminal jobs are retained for a configurable window and evicted by
//! [`JobRegistry::reap`] so memory stays bounded under sustained traffic.
//!
//! State is snapshotted to a JSON file after each mutation so terminal
//! history survives a restart. Jobs that were still in flight when the
//! previous process died are marked failed by [`JobRegistry::mark_lost`]
//! during startup, since resuming a partially-run encoder process is not
//! attempted.

mod types;

pub use types::*;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{RegistryError, WORKER_LOST};

/// Job lifecycle event for SSE broadcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum JobEvent {
    JobQueued {
        #[serde(flatten)]
        job: Job,
    },
    JobStarted {
        id: Uuid,
    },
    JobSucceeded {
        #[serde(flatten)]
        job: Job,
    },
    JobFailed {
        id: Uuid,
        error: String,
    },
    JobCancelled {
        id: Uuid,
    },
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Job>>,
    stats: RwLock<JobStats>,
    persistence_path: Option<PathBuf>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobRegistry {
    pub fn new(persistence_path: Option<PathBuf>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);

        let registry = Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            stats: RwLock::new(JobStats::default()),
            persistence_path,
            event_tx,
        });

        if let Some(ref path) = registry.persistence_path {
            if let Err(e) = registry.load_from_file(path) {
                tracing::warn!("Failed to load persisted job state: {}", e);
            }
        }

        registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Get a clone of the event sender for use in other components.
    pub fn event_sender(&self) -> broadcast::Sender<JobEvent> {
        self.event_tx.clone()
    }

    fn broadcast(&self, event: JobEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!("No subscribers for job event");
        }
    }

    /// Insert a newly admitted job (initial state Queued).
    pub fn create(&self, job: Job) {
        {
            let mut jobs = self.jobs.write();
            jobs.insert(job.id, job.clone());
        }
        self.broadcast(JobEvent::JobQueued { job });
        self.persist();
    }

    /// Remove a job that failed admission after being inserted.
    ///
    /// Only valid while the job is still Queued; used to roll back the
    /// submission path when the queue rejects the entry.
    pub fn discard(&self, id: Uuid) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get(&id) {
            if job.status == JobStatus::Queued {
                jobs.remove(&id);
            }
        }
    }

    /// Transition a job to InProgress.
    pub fn start(&self, id: Uuid) -> Result<Job, RegistryError> {
        let job = {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(&id).ok_or(RegistryError::NotFound)?;
            job.start()?;
            job.clone()
        };
        self.broadcast(JobEvent::JobStarted { id });
        self.persist();
        Ok(job)
    }

    /// Transition a job to Succeeded with its result reference.
    pub fn succeed(&self, id: Uuid, result: &str) -> Result<Job, RegistryError> {
        let job = {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(&id).ok_or(RegistryError::NotFound)?;
            job.succeed(result)?;
            job.clone()
        };
        self.stats.write().record_success(job.input_bytes);
        self.broadcast(JobEvent::JobSucceeded { job: job.clone() });
        self.persist();
        Ok(job)
    }

    /// Transition a job to Failed with its error detail.
    pub fn fail(&self, id: Uuid, error: &str) -> Result<Job, RegistryError> {
        let job = {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(&id).ok_or(RegistryError::NotFound)?;
            job.fail(error)?;
            job.clone()
        };
        self.stats.write().record_failure();
        self.broadcast(JobEvent::JobFailed {
            id,
            error: error.to_string(),
        });
        self.persist();
        Ok(job)
    }

    /// Transition a job to Cancelled.
    pub fn cancel(&self, id: Uuid) -> Result<Job, RegistryError> {
        let job = {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(&id).ok_or(RegistryError::NotFound)?;
            job.cancel()?;
            job.clone()
        };
        self.stats.write().record_cancelled();
        self.broadcast(JobEvent::JobCancelled { id });
        self.persist();
        Ok(job)
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<_> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        jobs
    }

    pub fn in_progress_ids(&self) -> HashSet<Uuid> {
        self.jobs
            .read()
            .values()
            .filter(|j| j.status == JobStatus::InProgress)
            .map(|j| j.id)
            .collect()
    }

    pub fn stats(&self) -> JobStats {
        self.stats.read().clone()
    }

    /// Evict terminal jobs whose finish time is older than the retention
    /// window. Returns the number of evicted jobs.
    pub fn reap(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(older_than).unwrap_or_else(|_| ChronoDuration::hours(1));
        let evicted = {
            let mut jobs = self.jobs.write();
            let before = jobs.len();
            jobs.retain(|_, j| {
                !(j.status.is_terminal() && j.finished_at.is_some_and(|t| t < cutoff))
            });
            before - jobs.len()
        };
        if evicted > 0 {
            tracing::debug!("Reaped {} terminal jobs past retention", evicted);
            self.persist();
        }
        evicted
    }

    /// Startup consistency pass over state loaded from a previous run.
    ///
    /// In-flight jobs are marked Failed (their worker is gone and resuming a
    /// half-written encode is not safe); still-queued jobs are marked
    /// Cancelled (their queue entries did not survive the restart, so they
    /// must be resubmitted). Returns the number of jobs reconciled.
    pub fn mark_lost(&self) -> usize {
        let mut reconciled = 0;
        {
            let mut jobs = self.jobs.write();
            for job in jobs.values_mut() {
                match job.status {
                    JobStatus::InProgress => {
                        // Legal transition: InProgress -> Failed.
                        if job.fail(WORKER_LOST).is_ok() {
                            tracing::warn!("Job {} marked failed: worker lost", job.id);
                            reconciled += 1;
                        }
                    }
                    JobStatus::Queued => {
                        if job.cancel().is_ok() {
                            tracing::warn!("Job {} cancelled: queue entry lost on restart", job.id);
                            reconciled += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
        if reconciled > 0 {
            self.persist();
        }
        reconciled
    }

    fn persist(&self) {
        if let Some(ref path) = self.persistence_path {
            if let Err(e) = self.save_to_file(path) {
                tracing::error!("Failed to persist job state: {}", e);
            }
        }
    }

    fn save_to_file(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct PersistedState {
            jobs: Vec<Job>,
            stats: JobStats,
        }

        let state = PersistedState {
            jobs: self.jobs.read().values().cloned().collect(),
            stats: self.stats(),
        };

        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn load_from_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        #[derive(Deserialize)]
        struct PersistedState {
            jobs: Vec<Job>,
            stats: JobStats,
        }

        let content = std::fs::read_to_string(path)?;
        let state: PersistedState = serde_json::from_str(&content)?;

        {
            let mut jobs = self.jobs.write();
            *jobs = state.jobs.into_iter().map(|j| (j.id, j)).collect();
        }
        *self.stats.write() = state.stats;

        Ok(())
    }
}
