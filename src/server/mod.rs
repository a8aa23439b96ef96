use crate::config::Config;
use crate::error::{AdmissionRejected, StagingError};
use crate::invoker::EncodeParams;
use crate::queue::JobQueue;
use crate::registry::{Job, JobRegistry};
use crate::staging::StagingStore;
use crate::store::DurableStore;
use crate::worker::CancelRegistry;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod routes_jobs;
pub mod routes_sse;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub registry: Arc<JobRegistry>,
    pub queue: Arc<JobQueue>,
    pub staging: Arc<StagingStore>,
    pub store: Arc<DurableStore>,
    pub cancels: CancelRegistry,
    pub config: Arc<Config>,
}

/// Why a submission was refused before a job record came to exist.
#[derive(Debug)]
pub enum SubmitError {
    Rejected(AdmissionRejected),
    Staging(StagingError),
    Io(std::io::Error),
}

impl AppContext {
    /// Full admission path for an uploaded input: size check, scratch
    /// reservation, input staging, registry insert, queue admission.
    ///
    /// Rolled back completely on rejection: no registry record and no
    /// scratch files survive a refused submission.
    pub async fn submit(
        &self,
        source_name: &str,
        data: &[u8],
        params: EncodeParams,
    ) -> Result<Job, SubmitError> {
        let size = data.len() as u64;
        if size > self.queue.max_input_bytes() {
            return Err(SubmitError::Rejected(AdmissionRejected::TooLarge));
        }

        let job = Job::new(source_name, size, params);
        let slot = self
            .staging
            .reserve(job.id, size, &job.params.extension)
            .map_err(SubmitError::Staging)?;

        if let Err(e) = tokio::fs::write(&slot.input_path, data).await {
            self.staging.release(job.id);
            return Err(SubmitError::Io(e));
        }

        // Insert before enqueue so a worker that dequeues immediately finds
        // the record; roll both back if admission fails.
        self.registry.create(job.clone());
        if let Err(rejected) = self.queue.submit(job.id, size) {
            self.registry.discard(job.id);
            self.staging.release(job.id);
            return Err(SubmitError::Rejected(rejected));
        }

        tracing::info!(
            "Admitted job {} ({}, {} bytes)",
            job.id,
            job.source_name,
            size
        );
        Ok(job)
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    let files_dir = ctx.store.root().to_path_buf();

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            routes_jobs::job_routes(ctx.config.jobs.max_input_bytes)
                .merge(routes_sse::sse_routes()),
        )
        // Durable outputs, served read-only.
        .nest_service("/files", ServeDir::new(files_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: &Config, ctx: AppContext) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
