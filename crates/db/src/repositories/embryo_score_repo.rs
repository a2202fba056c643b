//! Repository for the `embryo_scores` table.

use embryoscore_core::scoring::{EmbryoScore, NewEmbryoScore};
use embryoscore_core::types::DbId;
use sqlx::PgPool;

use crate::models::embryo_score::{into_score, EmbryoScoreRow};

/// Column list for `embryo_scores` queries.
const COLUMNS: &str = "\
    id, embryo_id, job_id, morph_score, kinetic_score, embryo_score, \
    classification, recommendation, confidence, reasoning, model_used, \
    analysis_version, is_current, created_at";

pub struct EmbryoScoreRepo;

impl EmbryoScoreRepo {
    /// Current scores for the given embryos, newest first. Callers keep the
    /// first row per embryo.
    pub async fn current_for_embryos(
        pool: &PgPool,
        embryo_ids: &[DbId],
    ) -> Result<Vec<EmbryoScore>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM embryo_scores \
             WHERE embryo_id = ANY($1) AND is_current \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, EmbryoScoreRow>(&query)
            .bind(embryo_ids)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_score).collect()
    }

    /// Every score for one embryo, newest first.
    pub async fn history(pool: &PgPool, embryo_id: DbId) -> Result<Vec<EmbryoScore>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM embryo_scores \
             WHERE embryo_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, EmbryoScoreRow>(&query)
            .bind(embryo_id)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_score).collect()
    }

    /// Row-lock the given embryos until the transaction ends, in id order.
    /// Concurrent write-backs for the same embryo then supersede one after
    /// the other instead of both inserting a current score.
    pub(crate) async fn lock_embryos_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        embryo_ids: &[DbId],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT id FROM embryos WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(embryo_ids)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Retire the embryo's current score and insert `score` as the new
    /// current one with the next `analysis_version`. The caller holds the
    /// embryo lock from [`Self::lock_embryos_in_tx`].
    pub(crate) async fn supersede_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job_id: DbId,
        score: &NewEmbryoScore,
    ) -> Result<EmbryoScore, sqlx::Error> {
        sqlx::query("UPDATE embryo_scores SET is_current = FALSE WHERE embryo_id = $1 AND is_current")
            .bind(score.embryo_id)
            .execute(&mut **tx)
            .await?;

        let query = format!(
            "INSERT INTO embryo_scores \
                 (embryo_id, job_id, morph_score, kinetic_score, embryo_score, \
                  classification, recommendation, confidence, reasoning, model_used, \
                  analysis_version, is_current) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                 COALESCE((SELECT MAX(analysis_version) FROM embryo_scores WHERE embryo_id = $1), 0) + 1, \
                 TRUE) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, EmbryoScoreRow>(&query)
            .bind(score.embryo_id)
            .bind(job_id)
            .bind(score.morph_score)
            .bind(score.kinetic_score)
            .bind(score.embryo_score)
            .bind(score.classification.as_str())
            .bind(score.recommendation.as_str())
            .bind(score.confidence)
            .bind(&score.reasoning)
            .bind(&score.model_used)
            .fetch_one(&mut **tx)
            .await?;
        into_score(row)
    }
}
