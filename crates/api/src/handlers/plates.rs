//! Handlers for plates and their embryos.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use embryoscore_core::error::CoreError;
use embryoscore_core::types::DbId;
use embryoscore_db::models::embryo::CreatePlate;
use serde::Deserialize;

use crate::error::AppResult;
use crate::handlers::parse_id_list;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/plates
pub async fn create_plate(
    State(state): State<AppState>,
    Json(input): Json<CreatePlate>,
) -> AppResult<impl IntoResponse> {
    if input.name.trim().is_empty() {
        return Err(CoreError::Validation("name must not be empty".to_string()).into());
    }
    let plate = state.store.create_plate(&input).await?;
    tracing::info!(plate_id = plate.id, "Plate created");
    Ok((StatusCode::CREATED, Json(DataResponse { data: plate })))
}

/// GET /api/v1/plates/{id}/embryos
pub async fn list_embryos(
    State(state): State<AppState>,
    Path(plate_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let embryos = state.store.embryos(plate_id).await?;
    Ok(Json(DataResponse { data: embryos }))
}

#[derive(Debug, Deserialize)]
pub struct EnsureEmbryo {
    pub position: i32,
}

/// POST /api/v1/plates/{id}/embryos
///
/// Returns the embryo at `position`, creating it when absent.
pub async fn ensure_embryo(
    State(state): State<AppState>,
    Path(plate_id): Path<DbId>,
    Json(input): Json<EnsureEmbryo>,
) -> AppResult<impl IntoResponse> {
    if input.position < 0 {
        return Err(CoreError::Validation("position must not be negative".to_string()).into());
    }
    let embryo = state.store.ensure_embryo(plate_id, input.position).await?;
    Ok(Json(DataResponse { data: embryo }))
}

#[derive(Debug, Deserialize)]
pub struct PlateStatusQuery {
    #[serde(default)]
    pub plate_ids: String,
}

/// GET /api/v1/plates/status?plate_ids=1,2
///
/// Newest analysis job for each listed plate. Plates without a job are
/// absent from the result.
pub async fn plate_status(
    State(state): State<AppState>,
    Query(query): Query<PlateStatusQuery>,
) -> AppResult<impl IntoResponse> {
    let ids = parse_id_list("plate_ids", &query.plate_ids)?;
    let jobs = if ids.is_empty() {
        Vec::new()
    } else {
        state.store.latest_for_plates(&ids).await?
    };
    Ok(Json(DataResponse { data: jobs }))
}
