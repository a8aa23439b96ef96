//! Error taxonomy for the job service.
//!
//! Admission failures are surfaced to the caller immediately and never
//! retried by the service. Encoder failures become job failure detail.
//! [`RegistryError::InvalidTransition`] indicates a consistency bug and is
//! never silently ignored.

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::registry::JobStatus;

/// Reasons a submission can be refused before a job is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionRejected {
    /// The queue is at its configured capacity.
    #[error("job queue is full")]
    QueueFull,
    /// The input exceeds the configured maximum size.
    #[error("input exceeds the configured size limit")]
    TooLarge,
    /// The service is shutting down and no longer admits work.
    #[error("service is shutting down")]
    ShuttingDown,
}

/// Errors from the staging store.
#[derive(Debug, Error)]
pub enum StagingError {
    /// The configured staging byte quota would be exceeded.
    #[error("staging storage exhausted ({staged} of {quota} bytes in use)")]
    StorageExhausted { staged: u64, quota: u64 },
    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the job registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("job not found")]
    NotFound,
    /// The requested state is not reachable from the current state.
    /// Transitions are monotonic; terminal states never revert.
    #[error("invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Classified outcome of a failed encoder invocation.
///
/// None of these are retried automatically: encoder failure is typically
/// deterministic for a given input, so retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The external encoder binary is missing or misconfigured.
    #[error("encoder binary not found: {0}")]
    EncoderNotFound(String),
    /// The encoder rejected the input format or codec.
    #[error("encoder rejected input: {0}")]
    UnsupportedInput(String),
    /// The encoder exceeded the configured duration and was killed.
    #[error("encoder timed out after {0:?}")]
    Timeout(Duration),
    /// Non-zero exit that does not match a known class.
    #[error("encoder exited with {status}: {stderr}")]
    EncoderCrashed { status: ExitStatus, stderr: String },
    /// The invocation was cancelled and the process terminated.
    #[error("conversion cancelled")]
    Cancelled,
    #[error("failed to run encoder: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure detail recorded when the startup consistency sweep finds a job
/// that was in flight when the previous process died.
pub const WORKER_LOST: &str = "worker lost: job was in progress when the service stopped";
