//! Worker write-back handlers.
//!
//! Every write after the claim carries the `attempt` (the `retry_count`
//! returned by the claim). A write for an attempt that was cancelled,
//! retried or already finished is refused with 409 `STALE_WRITE` and has no
//! effect.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use embryoscore_core::scoring::{ScoreInput, ScoreWeights};
use embryoscore_core::types::DbId;
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/worker/jobs/{id}/claim
///
/// Moves a pending job to processing. The returned `retry_count` is the
/// attempt number for the later writes.
pub async fn claim_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.writeback.claim(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub attempt: i32,
    #[serde(default)]
    pub scores: Vec<ScoreInput>,
    /// Overrides the default morphology/kinetics weighting.
    pub weights: Option<ScoreWeights>,
}

/// POST /api/v1/worker/jobs/{id}/complete
pub async fn complete_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(input): Json<CompleteRequest>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .writeback
        .complete(job_id, input.attempt, &input.scores, input.weights)
        .await?;
    Ok(Json(DataResponse { data: job }))
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub attempt: i32,
    pub error_message: String,
}

/// POST /api/v1/worker/jobs/{id}/fail
pub async fn fail_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
    Json(input): Json<FailRequest>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .writeback
        .fail(job_id, input.attempt, &input.error_message)
        .await?;
    Ok(Json(DataResponse { data: job }))
}
