//! Repositories for the `plates` and `embryos` tables.

use embryoscore_core::types::DbId;
use sqlx::PgPool;

use crate::models::embryo::{CreatePlate, Embryo, Plate};

const PLATE_COLUMNS: &str = "id, name, created_at, updated_at";

const EMBRYO_COLUMNS: &str = "id, plate_id, position, classification, created_at, updated_at";

pub struct PlateRepo;

impl PlateRepo {
    pub async fn create(pool: &PgPool, input: &CreatePlate) -> Result<Plate, sqlx::Error> {
        let query = format!("INSERT INTO plates (name) VALUES ($1) RETURNING {PLATE_COLUMNS}");
        sqlx::query_as::<_, Plate>(&query)
            .bind(&input.name)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Plate>, sqlx::Error> {
        let query = format!("SELECT {PLATE_COLUMNS} FROM plates WHERE id = $1");
        sqlx::query_as::<_, Plate>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

pub struct EmbryoRepo;

impl EmbryoRepo {
    /// Embryos of a plate in region order.
    pub async fn list_for_plate(pool: &PgPool, plate_id: DbId) -> Result<Vec<Embryo>, sqlx::Error> {
        let query = format!(
            "SELECT {EMBRYO_COLUMNS} FROM embryos WHERE plate_id = $1 ORDER BY position ASC"
        );
        sqlx::query_as::<_, Embryo>(&query)
            .bind(plate_id)
            .fetch_all(pool)
            .await
    }

    /// Create the embryo at `position` if missing and return it.
    pub async fn ensure(pool: &PgPool, plate_id: DbId, position: i32) -> Result<Embryo, sqlx::Error> {
        let query = format!(
            "INSERT INTO embryos (plate_id, position) VALUES ($1, $2) \
             ON CONFLICT (plate_id, position) DO UPDATE SET position = EXCLUDED.position \
             RETURNING {EMBRYO_COLUMNS}"
        );
        sqlx::query_as::<_, Embryo>(&query)
            .bind(plate_id)
            .bind(position)
            .fetch_one(pool)
            .await
    }
}
