//! Request handlers.
//!
//! Handlers stay thin: they parse the request, call the store or a pipeline
//! service from [`AppState`](crate::state::AppState), and wrap the result in
//! [`DataResponse`](crate::response::DataResponse). Errors map through
//! [`AppError`].

pub mod jobs;
pub mod plates;
pub mod queue;
pub mod scores;
pub mod worker;

use embryoscore_core::types::DbId;

use crate::error::{AppError, AppResult};

/// Parse a comma-separated id list such as `?plate_ids=1,2,3`.
///
/// Blank entries are skipped and duplicates dropped, keeping first-seen
/// order.
pub(crate) fn parse_id_list(param: &str, raw: &str) -> AppResult<Vec<DbId>> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id: DbId = part
            .parse()
            .map_err(|_| AppError::BadRequest(format!("{param}: '{part}' is not a valid id")))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
