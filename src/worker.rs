//! Worker pool: a fixed-size set of executors pulling from the shared queue.
//!
//! Each worker loops: dequeue, mark the job InProgress, run the encoder on
//! the job's scratch slot, move the output to the durable store on success,
//! record the outcome, and release the slot on every exit path. Jobs
//! submitted in order may finish out of order once multiple workers are
//! running; FIFO holds only for jobs still waiting in the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ConvertError, RegistryError};
use crate::invoker::TranscodeInvoker;
use crate::queue::{Dequeued, JobQueue};
use crate::registry::JobRegistry;
use crate::staging::StagingStore;
use crate::store::DurableStore;

/// Per-job cancellation tokens for in-flight conversions.
///
/// Cancelling an InProgress job is best-effort: the token kills the encoder
/// process, but if the encoder finishes first the natural outcome wins.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancelRegistry {
    fn register(&self, job_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(job_id, token.clone());
        token
    }

    fn unregister(&self, job_id: Uuid) {
        self.tokens.lock().remove(&job_id);
    }

    /// Fire the token for an in-flight job. Returns false when the job has
    /// no live conversion.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.tokens.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Fire every token; used when the shutdown grace period expires.
    pub fn cancel_all(&self) {
        for token in self.tokens.lock().values() {
            token.cancel();
        }
    }
}

struct WorkerContext {
    registry: Arc<JobRegistry>,
    queue: Arc<JobQueue>,
    staging: Arc<StagingStore>,
    store: Arc<DurableStore>,
    invoker: Arc<TranscodeInvoker>,
    cancels: CancelRegistry,
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    cancels: CancelRegistry,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers pulling from the shared queue.
    pub fn start(
        count: usize,
        registry: Arc<JobRegistry>,
        queue: Arc<JobQueue>,
        staging: Arc<StagingStore>,
        store: Arc<DurableStore>,
        invoker: Arc<TranscodeInvoker>,
        cancels: CancelRegistry,
    ) -> Self {
        let ctx = Arc::new(WorkerContext {
            registry,
            queue: queue.clone(),
            staging,
            store,
            invoker,
            cancels: cancels.clone(),
        });

        let handles = (0..count)
            .map(|n| {
                let ctx = ctx.clone();
                tokio::spawn(async move { worker_loop(n, ctx).await })
            })
            .collect();

        info!("Worker pool started with {} workers", count);
        Self {
            queue,
            cancels,
            handles,
        }
    }

    /// Stop admission, let in-flight jobs drain up to the grace period, then
    /// force-terminate any remaining encoder processes.
    pub async fn shutdown(self, grace: Duration) {
        self.queue.shutdown();

        let mut drain = futures::future::join_all(self.handles);
        if tokio::time::timeout(grace, &mut drain).await.is_err() {
            warn!("Drain grace period expired, killing in-flight encoders");
            self.cancels.cancel_all();
            let _ = drain.await;
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(n: usize, ctx: Arc<WorkerContext>) {
    loop {
        match ctx.queue.dequeue().await {
            Dequeued::Shutdown => {
                tracing::debug!("Worker {} exiting", n);
                break;
            }
            Dequeued::Job(job_id) => {
                process_job(&ctx, job_id).await;
                ctx.queue.task_done();
            }
        }
    }
}

async fn process_job(ctx: &WorkerContext, job_id: Uuid) {
    // Mark InProgress first so the registry view never shows a job as
    // Queued while an encoder is running on it.
    match ctx.registry.start(job_id) {
        Ok(_) => {}
        Err(RegistryError::InvalidTransition { .. }) => {
            // Cancelled between dequeue and here; nothing to run.
            ctx.staging.release(job_id);
            return;
        }
        Err(RegistryError::NotFound) => {
            warn!("Dequeued unknown job {}", job_id);
            ctx.staging.release(job_id);
            return;
        }
    }

    let token = ctx.cancels.register(job_id);
    let outcome = run_conversion(ctx, job_id, &token).await;
    ctx.cancels.unregister(job_id);

    match outcome {
        Outcome::Succeeded(result) => {
            if let Err(e) = ctx.registry.succeed(job_id, &result) {
                error!("Failed to record success for job {}: {}", job_id, e);
            } else {
                info!("Job {} succeeded: {}", job_id, result);
            }
        }
        Outcome::Cancelled => {
            // The cancel API may already have moved the job to Cancelled.
            match ctx.registry.cancel(job_id) {
                Ok(_) | Err(RegistryError::InvalidTransition { .. }) => {
                    info!("Job {} cancelled", job_id);
                }
                Err(e) => error!("Failed to record cancellation for job {}: {}", job_id, e),
            }
        }
        Outcome::Failed(detail) => {
            if let Err(e) = ctx.registry.fail(job_id, &detail) {
                error!("Failed to record failure for job {}: {}", job_id, e);
            } else {
                warn!("Job {} failed: {}", job_id, detail);
            }
        }
    }

    // Always, regardless of outcome.
    ctx.staging.release(job_id);
}

enum Outcome {
    Succeeded(String),
    Cancelled,
    Failed(String),
}

async fn run_conversion(ctx: &WorkerContext, job_id: Uuid, token: &CancellationToken) -> Outcome {
    let Some(job) = ctx.registry.get(job_id) else {
        return Outcome::Failed("job record disappeared".to_string());
    };
    let Some(slot) = ctx.staging.slot(job_id) else {
        return Outcome::Failed("scratch slot missing".to_string());
    };

    let result = ctx
        .invoker
        .convert(&slot.input_path, &slot.output_path, &job.params, token)
        .await;

    match result {
        Ok(()) => {
            match ctx
                .store
                .store(&slot.output_path, job_id, &job.params.extension)
            {
                Ok(artifact) => Outcome::Succeeded(artifact.file_name),
                Err(e) => Outcome::Failed(format!("failed to store output: {e}")),
            }
        }
        Err(ConvertError::Cancelled) => Outcome::Cancelled,
        Err(e) => Outcome::Failed(e.to_string()),
    }
}
