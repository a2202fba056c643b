use axum::routing::get;
use axum::Router;

use crate::handlers::scores;
use crate::state::AppState;

/// Score reads, merged at the `/api/v1` root.
///
/// ```text
/// GET    /scores                  -> current_scores
/// GET    /embryos/{id}/scores     -> score_history
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scores", get(scores::current_scores))
        .route("/embryos/{id}/scores", get(scores::score_history))
}
