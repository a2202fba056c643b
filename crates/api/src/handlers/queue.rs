use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/queue
///
/// Last summary published by the queue aggregator.
pub async fn queue_summary(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.aggregator.current(),
    }))
}

/// POST /api/v1/queue/cancel-all
///
/// Cancels every pending or processing job and returns them. The queue
/// summary is refreshed right away.
pub async fn cancel_all(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let cancelled = state.controller.cancel_all().await?;
    if let Err(e) = state.aggregator.refresh().await {
        tracing::warn!(error = %e, "Queue refresh after cancel-all failed");
    }
    Ok(Json(DataResponse { data: cancelled }))
}
