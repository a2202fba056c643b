//! Handlers for the `/jobs` resource.
//!
//! Mutations go through the [`JobController`](embryoscore_pipeline::JobController)
//! so a duplicate of a mutation still in flight on the same job is refused
//! with 409.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use embryoscore_core::analysis_job::{AnalysisJob, JobStatus};
use embryoscore_core::correction::Submission;
use embryoscore_core::types::DbId;
use embryoscore_db::models::analysis_job::CreateAnalysisJob;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(flatten)]
    pub job: CreateAnalysisJob,
    /// Trigger the worker right after the insert.
    #[serde(default)]
    pub dispatch: bool,
}

#[derive(Debug, Serialize)]
pub struct CreatedJob {
    pub job: AnalysisJob,
    pub dispatched: bool,
    /// Why the requested dispatch did not happen. The job stays pending and
    /// can be dispatched again.
    pub dispatch_error: Option<String>,
}

/// POST /api/v1/jobs
///
/// Create a pending job. A failed immediate dispatch does not undo the
/// insert; it is reported in `dispatch_error`.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    let job = state.store.create(&input.job).await?;
    tracing::info!(job_id = job.id, plate_id = job.plate_id, "Analysis job created");

    let (dispatched, dispatch_error) = if input.dispatch {
        match state.controller.dispatch(job.id).await {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        }
    } else {
        (false, None)
    };

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: CreatedJob {
                job,
                dispatched,
                dispatch_error,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    /// Comma-separated status names, e.g. `pending,processing`.
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn parse_statuses(raw: &str) -> AppResult<Vec<JobStatus>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            JobStatus::parse(name)
                .ok_or_else(|| AppError::BadRequest(format!("unknown job status '{name}'")))
        })
        .collect()
}

/// GET /api/v1/jobs?status=pending,processing
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let statuses = match query.status.as_deref() {
        Some(raw) => Some(parse_statuses(raw)?),
        None => None,
    };
    let jobs = state
        .store
        .list(statuses.as_deref(), query.limit, query.offset)
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.store.get(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    pub timeout_secs: Option<u64>,
}

/// GET /api/v1/jobs/{id}/wait?timeout_secs=20
///
/// Long-poll until the job is terminal. When the wait times out the job is
/// returned as it currently is, so the caller can inspect the status and
/// wait again.
pub async fn wait_for_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Query(query): Query<WaitQuery>,
) -> AppResult<impl IntoResponse> {
    let max = state.config.max_wait_secs();
    let timeout = Duration::from_secs(query.timeout_secs.unwrap_or(max).min(max));

    let cancel = CancellationToken::new();
    let job = match tokio::time::timeout(timeout, state.poller.watch_job(job_id, &cancel)).await {
        Ok(result) => result?,
        Err(_) => state.store.get(job_id).await?,
    };
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Detection and corrections
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/detect
///
/// Run detection on the job's media and store the regions as
/// `detected_bboxes`. Returns the regions, confidence and counts.
pub async fn detect_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let detection = state.detection.detect_job(job_id).await?;
    Ok(Json(DataResponse { data: detection }))
}

/// POST /api/v1/jobs/{id}/submit
///
/// Store the operator's corrected regions as `manual_bboxes` and apply the
/// per-region labels to the plate's embryos.
pub async fn submit_corrections(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(submission): Json<Submission>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller.submit(job_id, &submission).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Operator actions
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/dispatch
pub async fn dispatch_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller.dispatch(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/retry
///
/// A retry whose trigger fails still keeps the reset; the 502 tells the
/// caller to dispatch again.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller.retry(job_id).await?;
    refresh_queue(&state).await;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/reprocess
pub async fn reprocess_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller.reprocess(job_id).await?;
    refresh_queue(&state).await;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/cancel
///
/// Advisory: a worker already running the job is not interrupted, but its
/// later writes are refused.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.controller.cancel(job_id).await?;
    refresh_queue(&state).await;
    Ok(Json(DataResponse { data: job }))
}

async fn refresh_queue(state: &AppState) {
    if let Err(e) = state.aggregator.refresh().await {
        tracing::warn!(error = %e, "Queue refresh failed");
    }
}
