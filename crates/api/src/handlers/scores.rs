//! Handlers for embryo scores.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use embryoscore_core::types::DbId;
use serde::Deserialize;

use crate::error::AppResult;
use crate::handlers::parse_id_list;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScoresQuery {
    #[serde(default)]
    pub embryo_ids: String,
}

/// GET /api/v1/scores?embryo_ids=1,2
///
/// Current score of each listed embryo; unscored embryos are absent.
pub async fn current_scores(
    State(state): State<AppState>,
    Query(query): Query<ScoresQuery>,
) -> AppResult<impl IntoResponse> {
    let ids = parse_id_list("embryo_ids", &query.embryo_ids)?;
    let scores = if ids.is_empty() {
        Vec::new()
    } else {
        state.store.current_scores(&ids).await?
    };
    Ok(Json(DataResponse { data: scores }))
}

/// GET /api/v1/embryos/{id}/scores
pub async fn score_history(
    State(state): State<AppState>,
    Path(embryo_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let history = state.store.score_history(embryo_id).await?;
    Ok(Json(DataResponse { data: history }))
}
