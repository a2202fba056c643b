use axum::routing::{get, post};
use axum::Router;

use crate::handlers::plates;
use crate::state::AppState;

/// Routes mounted at `/plates`.
///
/// ```text
/// POST   /                -> create_plate
/// GET    /status          -> plate_status
/// GET    /{id}/embryos    -> list_embryos
/// POST   /{id}/embryos    -> ensure_embryo
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(plates::create_plate))
        .route("/status", get(plates::plate_status))
        .route(
            "/{id}/embryos",
            get(plates::list_embryos).post(plates::ensure_embryo),
        )
}
