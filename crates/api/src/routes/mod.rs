pub mod health;
pub mod jobs;
pub mod plates;
pub mod queue;
pub mod scores;
pub mod worker;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /plates                                   create
/// /plates/status?plate_ids=                 latest job per plate
/// /plates/{id}/embryos                      list, ensure
///
/// /jobs                                     list (?status=), create
/// /jobs/{id}                                get
/// /jobs/{id}/wait                           block until terminal
/// /jobs/{id}/detect                         run detection on the media
/// /jobs/{id}/submit                         operator corrections
/// /jobs/{id}/dispatch|retry|reprocess|cancel
///
/// /queue                                    summary
/// /queue/cancel-all                         cancel every active job
///
/// /scores?embryo_ids=                       current scores
/// /embryos/{id}/scores                      score history
///
/// /worker/jobs/{id}/claim|complete|fail     worker write-back
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/plates", plates::router())
        .nest("/jobs", jobs::router())
        .nest("/queue", queue::router())
        .merge(scores::router())
        .nest("/worker", worker::router())
}
