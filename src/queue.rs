//! Bounded, admission-controlled FIFO job queue.
//!
//! An unbounded queue under load allows unbounded memory and disk growth
//! from staged inputs, so admission converts overload into an explicit,
//! immediate rejection. `submit` never blocks the caller; `dequeue` blocks
//! (asynchronously) until work arrives or shutdown is signalled.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AdmissionRejected;

#[derive(Debug, Clone)]
struct QueueEntry {
    job_id: Uuid,
    admitted_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<QueueEntry>,
    /// Jobs handed to a worker and not yet finished. Capacity counts these
    /// too: an InProgress job still holds its admission slot, so pending
    /// work (and staged disk) stays bounded by the configured depth.
    in_flight: usize,
}

/// Result of a blocking dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    Job(Uuid),
    /// The service is shutting down; the worker should exit its loop.
    Shutdown,
}

pub struct JobQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    max_input_bytes: u64,
    notify: Notify,
    shutdown: CancellationToken,
}

impl JobQueue {
    pub fn new(capacity: usize, max_input_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
            max_input_bytes,
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn max_input_bytes(&self) -> u64 {
        self.max_input_bytes
    }

    /// Admit a job or reject it immediately.
    ///
    /// Rejects when pending work (queued plus in flight) is at capacity,
    /// when the input exceeds the configured size limit, or when shutdown
    /// has begun. Never blocks.
    pub fn submit(&self, job_id: Uuid, input_bytes: u64) -> Result<(), AdmissionRejected> {
        if self.shutdown.is_cancelled() {
            return Err(AdmissionRejected::ShuttingDown);
        }
        if input_bytes > self.max_input_bytes {
            return Err(AdmissionRejected::TooLarge);
        }

        {
            let mut inner = self.inner.lock();
            if inner.entries.len() + inner.in_flight >= self.capacity {
                return Err(AdmissionRejected::QueueFull);
            }
            inner.entries.push_back(QueueEntry {
                job_id,
                admitted_at: Utc::now(),
            });
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Wait until a job is available or shutdown is signalled.
    ///
    /// Remaining entries are still handed out after shutdown begins so
    /// in-flight work can drain; `Shutdown` is only returned once the queue
    /// is empty.
    pub async fn dequeue(&self) -> Dequeued {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(entry) = inner.entries.pop_front() {
                    inner.in_flight += 1;
                    let waited = Utc::now() - entry.admitted_at;
                    tracing::debug!(
                        "Dequeued job {} after {}ms in queue",
                        entry.job_id,
                        waited.num_milliseconds()
                    );
                    return Dequeued::Job(entry.job_id);
                }
            }
            if self.shutdown.is_cancelled() {
                return Dequeued::Shutdown;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Release the admission slot held by a dequeued job. Workers call this
    /// once a job reaches a terminal state.
    pub fn task_done(&self) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    /// Remove a still-queued entry. Returns false if the entry has already
    /// been dequeued (or was never queued).
    pub fn remove(&self, job_id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.entries.iter().position(|e| e.job_id == job_id) {
            inner.entries.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Stop admission and wake all blocked workers.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
