//! Plate and embryo rows.

use embryoscore_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `plates` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Plate {
    pub id: DbId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a plate.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlate {
    pub name: String,
}

/// A row from the `embryos` table. `position` is the region index on the
/// plate; `classification` is the operator grade code.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Embryo {
    pub id: DbId,
    pub plate_id: DbId,
    pub position: i32,
    pub classification: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
