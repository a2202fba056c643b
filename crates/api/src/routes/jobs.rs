use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> create_job
/// GET    /{id}            -> get_job
/// GET    /{id}/wait       -> wait_for_job
/// POST   /{id}/detect     -> detect_job
/// POST   /{id}/submit     -> submit_corrections
/// POST   /{id}/dispatch   -> dispatch_job
/// POST   /{id}/retry      -> retry_job
/// POST   /{id}/reprocess  -> reprocess_job
/// POST   /{id}/cancel     -> cancel_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/wait", get(jobs::wait_for_job))
        .route("/{id}/detect", post(jobs::detect_job))
        .route("/{id}/submit", post(jobs::submit_corrections))
        .route("/{id}/dispatch", post(jobs::dispatch_job))
        .route("/{id}/retry", post(jobs::retry_job))
        .route("/{id}/reprocess", post(jobs::reprocess_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
}
