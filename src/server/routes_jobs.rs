use crate::registry::{Job, JobStatus};
use crate::server::{AppContext, SubmitError};
use crate::store::DurableStore;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AdmissionRejected;

/// Multipart framing overhead allowed on top of the payload itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

pub fn job_routes(max_input_bytes: u64) -> Router<AppContext> {
    Router::new()
        .route(
            "/jobs",
            post(submit_job).layer(DefaultBodyLimit::max(
                (max_input_bytes + MULTIPART_OVERHEAD) as usize,
            )),
        )
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id", delete(cancel_job))
        .route("/jobs/:id/result", get(get_result))
        .route("/stats", get(stats))
}

#[derive(Serialize)]
struct SubmitJobResponse {
    job_id: Uuid,
    status_url: String,
}

async fn submit_job(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitJobResponse>), (StatusCode, String)> {
    // Reject a declared-oversized body before reading it; past this point
    // the body limit would surface as a generic read error instead of 413.
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > ctx.config.jobs.max_input_bytes + MULTIPART_OVERHEAD) {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            AdmissionRejected::TooLarge.to_string(),
        ));
    }

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut params = ctx.config.encoder.default_params();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed upload: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                let name = field
                    .file_name()
                    .unwrap_or("upload")
                    .to_string();
                let data = field.bytes().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("failed to read upload: {e}"))
                })?;
                file = Some((name, data.to_vec()));
            }
            "codec" => {
                params.audio_codec = read_text_field(field).await?;
            }
            "bitrate" => {
                params.audio_bitrate = read_text_field(field).await?;
            }
            other => {
                tracing::debug!("Ignoring unknown upload field: {}", other);
            }
        }
    }

    let (source_name, data) = file.ok_or((
        StatusCode::BAD_REQUEST,
        "missing 'file' field in upload".to_string(),
    ))?;

    match ctx.submit(&source_name, &data, params).await {
        Ok(job) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitJobResponse {
                job_id: job.id,
                status_url: format!("/api/jobs/{}", job.id),
            }),
        )),
        Err(SubmitError::Rejected(AdmissionRejected::TooLarge)) => Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            AdmissionRejected::TooLarge.to_string(),
        )),
        Err(SubmitError::Rejected(rejected)) => {
            Err((StatusCode::TOO_MANY_REQUESTS, rejected.to_string()))
        }
        Err(SubmitError::Staging(e)) => {
            tracing::warn!("Submission refused: {}", e);
            Err((StatusCode::INSUFFICIENT_STORAGE, e.to_string()))
        }
        Err(SubmitError::Io(e)) => {
            tracing::error!("Failed to stage upload: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to stage upload".to_string(),
            ))
        }
    }
}

async fn read_text_field(
    field: axum::extract::multipart::Field<'_>,
) -> Result<String, (StatusCode, String)> {
    field
        .text()
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad form field: {e}")))
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let mut jobs = ctx.registry.list();

    // Filter by status if specified, matching the serialized form
    // ("queued", "in_progress", ...).
    if let Some(status) = params.status {
        jobs.retain(|j| {
            serde_json::to_value(j.status)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.eq_ignore_ascii_case(&status)))
                .unwrap_or(false)
        });
    }

    // Apply pagination
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(100);
    let jobs: Vec<_> = jobs.into_iter().skip(offset).take(limit).collect();

    Json(jobs)
}

async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, StatusCode> {
    ctx.registry.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_result(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<Redirect, (StatusCode, String)> {
    let job = ctx
        .registry
        .get(id)
        .ok_or((StatusCode::NOT_FOUND, "job not found".to_string()))?;

    match (job.status, job.result) {
        (JobStatus::Succeeded, Some(file_name)) => {
            Ok(Redirect::to(&DurableStore::download_path(&file_name)))
        }
        (JobStatus::Queued | JobStatus::InProgress, _) => Err((
            StatusCode::CONFLICT,
            "job has not finished yet".to_string(),
        )),
        (JobStatus::Failed, _) => Err((
            StatusCode::GONE,
            job.error.unwrap_or_else(|| "job failed".to_string()),
        )),
        (JobStatus::Cancelled, _) => Err((StatusCode::GONE, "job was cancelled".to_string())),
        (JobStatus::Succeeded, None) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "job succeeded but has no result reference".to_string(),
        )),
    }
}

/// Cancel a job.
///
/// Queued jobs are pulled from the queue and cancelled outright. InProgress
/// jobs get a best-effort kill signal; the worker records the final state,
/// and if the encoder finishes before the kill lands the natural outcome
/// wins.
async fn cancel_job(
    State(ctx): State<AppContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let job = ctx
        .registry
        .get(id)
        .ok_or((StatusCode::NOT_FOUND, "job not found".to_string()))?;

    if job.status.is_terminal() {
        return Err((
            StatusCode::CONFLICT,
            format!("job is already terminal ({:?})", job.status),
        ));
    }

    if ctx.queue.remove(id) {
        // Still queued: no worker has touched it, cancel directly.
        ctx.registry
            .cancel(id)
            .map_err(|e| (StatusCode::CONFLICT, e.to_string()))?;
        ctx.staging.release(id);
        tracing::info!("Cancelled queued job {}", id);
        return Ok(StatusCode::OK);
    }

    if ctx.cancels.cancel(id) {
        tracing::info!("Requested cancellation of in-flight job {}", id);
        return Ok(StatusCode::ACCEPTED);
    }

    // Dequeued but not yet registered for cancellation, or finished in the
    // meantime. Report the race to the caller rather than guessing.
    Err((
        StatusCode::CONFLICT,
        "job is between states; retry or poll status".to_string(),
    ))
}

async fn stats(State(ctx): State<AppContext>) -> impl IntoResponse {
    let stats = ctx.registry.stats();
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "queue_depth": ctx.queue.len(),
        "stats": stats,
        "success_rate": stats.success_rate(),
    }))
}
