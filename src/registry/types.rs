use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::invoker::EncodeParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Original name of the uploaded file, for display only.
    pub source_name: String,
    pub input_bytes: u64,
    pub params: EncodeParams,
    pub status: JobStatus,
    /// File name of the stored artifact, set only on success.
    pub result: Option<String>,
    /// Failure detail, set only on failure.
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Reachability per the job state machine: Queued -> InProgress ->
    /// {Succeeded, Failed}, with Cancelled reachable from Queued and
    /// InProgress. Terminal states have no outgoing edges.
    pub fn can_transition(self, to: JobStatus) -> bool {
        match (self, to) {
            (JobStatus::Queued, JobStatus::InProgress) => true,
            (JobStatus::Queued, JobStatus::Cancelled) => true,
            (JobStatus::InProgress, JobStatus::Succeeded) => true,
            (JobStatus::InProgress, JobStatus::Failed) => true,
            (JobStatus::InProgress, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl Job {
    pub fn new(source_name: impl Into<String>, input_bytes: u64, params: EncodeParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_name: source_name.into(),
            input_bytes,
            params,
            status: JobStatus::Queued,
            result: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), RegistryError> {
        if !self.status.can_transition(to) {
            return Err(RegistryError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), RegistryError> {
        self.transition(JobStatus::InProgress)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn succeed(&mut self, result: &str) -> Result<(), RegistryError> {
        self.transition(JobStatus::Succeeded)?;
        self.result = Some(result.to_string());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: &str) -> Result<(), RegistryError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), RegistryError> {
        self.transition(JobStatus::Cancelled)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobStats {
    pub total_finished: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_bytes_in: u64,
}

impl JobStats {
    pub fn success_rate(&self) -> f32 {
        if self.total_finished == 0 {
            return 0.0;
        }
        (self.succeeded as f32 / self.total_finished as f32) * 100.0
    }

    pub fn record_success(&mut self, bytes: u64) {
        self.total_finished += 1;
        self.succeeded += 1;
        self.total_bytes_in += bytes;
    }

    pub fn record_failure(&mut self) {
        self.total_finished += 1;
        self.failed += 1;
    }

    pub fn record_cancelled(&mut self) {
        self.total_finished += 1;
        self.cancelled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EncodeParams {
        EncodeParams::default()
    }

    #[test]
    fn new_job_is_queued() {
        let job = Job::new("song.mp3", 1024, params());
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn full_lifecycle_success() {
        let mut job = Job::new("song.mp3", 1024, params());
        job.start().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.started_at.is_some());

        job.succeed("abc.aac").unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result.as_deref(), Some("abc.aac"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut job = Job::new("song.mp3", 1024, params());
        job.start().unwrap();
        job.fail("boom").unwrap();

        let err = job.start().unwrap_err();
        assert!(matches!(
            err,
            crate::error::RegistryError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::InProgress,
            }
        ));
        // Status unchanged after the rejected transition.
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn cannot_succeed_from_queued() {
        let mut job = Job::new("song.mp3", 1024, params());
        assert!(job.succeed("x").is_err());
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn cancel_from_queued_and_in_progress() {
        let mut queued = Job::new("a.mp3", 1, params());
        queued.cancel().unwrap();
        assert_eq!(queued.status, JobStatus::Cancelled);

        let mut running = Job::new("b.mp3", 1, params());
        running.start().unwrap();
        running.cancel().unwrap();
        assert_eq!(running.status, JobStatus::Cancelled);
    }

    #[test]
    fn stats_success_rate() {
        let mut stats = JobStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        stats.record_success(100);
        stats.record_failure();
        assert_eq!(stats.total_finished, 2);
        assert_eq!(stats.success_rate(), 50.0);
    }
}
