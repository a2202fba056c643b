use axum::routing::{get, post};
use axum::Router;

use crate::handlers::queue;
use crate::state::AppState;

/// Routes mounted at `/queue`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(queue::queue_summary))
        .route("/cancel-all", post(queue::cancel_all))
}
