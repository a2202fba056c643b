use axum::routing::post;
use axum::Router;

use crate::handlers::worker;
use crate::state::AppState;

/// Worker write-back routes mounted at `/worker`.
///
/// ```text
/// POST   /jobs/{id}/claim     -> claim_job
/// POST   /jobs/{id}/complete  -> complete_job
/// POST   /jobs/{id}/fail      -> fail_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs/{id}/claim", post(worker::claim_job))
        .route("/jobs/{id}/complete", post(worker::complete_job))
        .route("/jobs/{id}/fail", post(worker::fail_job))
}
