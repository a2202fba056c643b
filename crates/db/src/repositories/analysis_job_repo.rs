//! Repository for the `analysis_jobs` table.
//!
//! Every status write is a single conditioned `UPDATE ... RETURNING`: the
//! caller learns whether its precondition still held from `Some`/`None`
//! instead of reading and writing in two steps. Only cancel and cancel-all
//! are unconditional.

use embryoscore_core::analysis_job::{
    truncate_error_message, AnalysisJob, JobStatus, CANCELLED_MESSAGE, MAX_RETRY_COUNT,
};
use embryoscore_core::detection::DetectedRegion;
use embryoscore_core::scoring::NewEmbryoScore;
use embryoscore_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::analysis_job::{into_job, AnalysisJobRow, CreateAnalysisJob, StatusId};
use crate::repositories::embryo_score_repo::EmbryoScoreRepo;

/// Column list for `analysis_jobs` queries.
const COLUMNS: &str = "\
    id, plate_id, status_id, media_ref, expected_count, \
    manual_bboxes, detected_bboxes, retry_count, error_message, \
    created_at, started_at, completed_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 200;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

fn status_ids(statuses: &[JobStatus]) -> Vec<StatusId> {
    statuses.iter().map(|s| s.id()).collect()
}

fn active_ids() -> Vec<StatusId> {
    status_ids(&JobStatus::ACTIVE)
}

fn regions_json(regions: &[DetectedRegion]) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(regions).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Provides queries and conditioned transitions for analysis jobs.
pub struct AnalysisJobRepo;

impl AnalysisJobRepo {
    /// Insert a new `pending` job.
    pub async fn create(pool: &PgPool, input: &CreateAnalysisJob) -> Result<AnalysisJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO analysis_jobs (plate_id, status_id, media_ref, expected_count) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(input.plate_id)
            .bind(JobStatus::Pending.id())
            .bind(&input.media_ref)
            .bind(input.expected_count)
            .fetch_one(pool)
            .await?;
        into_job(row)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM analysis_jobs WHERE id = $1");
        sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    /// Jobs in any of `statuses`, oldest first.
    pub async fn jobs_in_status(
        pool: &PgPool,
        statuses: &[JobStatus],
    ) -> Result<Vec<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM analysis_jobs \
             WHERE status_id = ANY($1) \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(status_ids(statuses))
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_job).collect()
    }

    /// Pending and processing jobs, oldest first.
    pub async fn active_jobs(pool: &PgPool) -> Result<Vec<AnalysisJob>, sqlx::Error> {
        Self::jobs_in_status(pool, &JobStatus::ACTIVE).await
    }

    /// Jobs created in `[from, to)`, oldest first.
    pub async fn jobs_created_between(
        pool: &PgPool,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM analysis_jobs \
             WHERE created_at >= $1 AND created_at < $2 \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_job).collect()
    }

    /// Newest first, optionally filtered by status.
    pub async fn list(
        pool: &PgPool,
        statuses: Option<&[JobStatus]>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<AnalysisJob>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);

        let rows = match statuses {
            Some(statuses) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM analysis_jobs \
                     WHERE status_id = ANY($1) \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $2 OFFSET $3"
                );
                sqlx::query_as::<_, AnalysisJobRow>(&query)
                    .bind(status_ids(statuses))
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {COLUMNS} FROM analysis_jobs \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $1 OFFSET $2"
                );
                sqlx::query_as::<_, AnalysisJobRow>(&query)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await?
            }
        };
        rows.into_iter().map(into_job).collect()
    }

    /// Newest job per plate.
    pub async fn latest_for_plates(
        pool: &PgPool,
        plate_ids: &[DbId],
    ) -> Result<Vec<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "SELECT DISTINCT ON (plate_id) {COLUMNS} FROM analysis_jobs \
             WHERE plate_id = ANY($1) \
             ORDER BY plate_id, created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(plate_ids)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_job).collect()
    }

    /// Replace the retained detector output.
    pub async fn set_detected_bboxes(
        pool: &PgPool,
        id: DbId,
        regions: &[DetectedRegion],
    ) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_jobs SET detected_bboxes = $2 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .bind(regions_json(regions)?)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    /// Attach operator regions and write per-region grades onto the plate's
    /// embryos, in one transaction. Only a `pending` job accepts a
    /// submission; `None` when it is not pending.
    pub async fn submit_manual_bboxes(
        pool: &PgPool,
        id: DbId,
        regions: &[DetectedRegion],
        labels: &[Option<&str>],
    ) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE analysis_jobs SET manual_bboxes = $2 \
             WHERE id = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        let Some(row) = sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .bind(regions_json(regions)?)
            .bind(JobStatus::Pending.id())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        for (position, label) in labels.iter().enumerate() {
            sqlx::query(
                "INSERT INTO embryos (plate_id, position, classification) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (plate_id, position) DO UPDATE \
                 SET classification = COALESCE(EXCLUDED.classification, embryos.classification)",
            )
            .bind(row.plate_id)
            .bind(position as i32)
            .bind(*label)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        into_job(row).map(Some)
    }

    // -----------------------------------------------------------------------
    // Worker transitions
    // -----------------------------------------------------------------------

    /// `pending → processing`, setting `started_at`. `None` when the job is
    /// not pending or has used up its attempts.
    pub async fn claim(pool: &PgPool, id: DbId) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_jobs \
             SET status_id = $2, started_at = NOW() \
             WHERE id = $1 AND status_id = $3 AND retry_count < $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Processing.id())
            .bind(JobStatus::Pending.id())
            .bind(MAX_RETRY_COUNT)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    /// `processing → completed` for attempt `attempt`, superseding and
    /// inserting the scores in the same transaction. `None` (and nothing
    /// written) when the precondition no longer holds.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        attempt: i32,
        scores: &[NewEmbryoScore],
    ) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE analysis_jobs \
             SET status_id = $2, completed_at = NOW(), error_message = NULL \
             WHERE id = $1 AND status_id = $3 AND retry_count = $4 \
             RETURNING {COLUMNS}"
        );
        let Some(row) = sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Completed.id())
            .bind(JobStatus::Processing.id())
            .bind(attempt)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut embryo_ids: Vec<DbId> = scores.iter().map(|s| s.embryo_id).collect();
        embryo_ids.sort_unstable();
        embryo_ids.dedup();
        EmbryoScoreRepo::lock_embryos_in_tx(&mut tx, &embryo_ids).await?;

        for score in scores {
            EmbryoScoreRepo::supersede_in_tx(&mut tx, id, score).await?;
        }

        tx.commit().await?;
        into_job(row).map(Some)
    }

    /// `processing → failed` for attempt `attempt`.
    pub async fn fail(
        pool: &PgPool,
        id: DbId,
        attempt: i32,
        message: &str,
    ) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_jobs \
             SET status_id = $2, completed_at = NOW(), error_message = $3 \
             WHERE id = $1 AND status_id = $4 AND retry_count = $5 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Failed.id())
            .bind(truncate_error_message(message))
            .bind(JobStatus::Processing.id())
            .bind(attempt)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    // -----------------------------------------------------------------------
    // Operator transitions
    // -----------------------------------------------------------------------

    /// Unconditional cancel. `None` only when the job does not exist.
    pub async fn cancel(pool: &PgPool, id: DbId) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_jobs \
             SET status_id = $2, completed_at = NOW(), error_message = $3 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Failed.id())
            .bind(CANCELLED_MESSAGE)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    /// Cancel every pending and processing job in one statement.
    pub async fn cancel_all(pool: &PgPool) -> Result<Vec<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_jobs \
             SET status_id = $1, completed_at = NOW(), error_message = $2 \
             WHERE status_id = ANY($3) \
             RETURNING {COLUMNS}"
        );
        let rows = sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(JobStatus::Failed.id())
            .bind(CANCELLED_MESSAGE)
            .bind(active_ids())
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_job).collect()
    }

    /// Reset to `pending` with `retry_count + 1`, conditioned on the
    /// `retry_count` the caller observed.
    pub async fn retry(
        pool: &PgPool,
        id: DbId,
        observed_retry_count: i32,
    ) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_jobs \
             SET status_id = $2, retry_count = retry_count + 1, \
                 started_at = NULL, completed_at = NULL, error_message = NULL \
             WHERE id = $1 AND retry_count = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Pending.id())
            .bind(observed_retry_count)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    /// `completed → pending` with timestamps and error cleared.
    pub async fn reprocess(pool: &PgPool, id: DbId) -> Result<Option<AnalysisJob>, sqlx::Error> {
        let query = format!(
            "UPDATE analysis_jobs \
             SET status_id = $2, started_at = NULL, completed_at = NULL, error_message = NULL \
             WHERE id = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AnalysisJobRow>(&query)
            .bind(id)
            .bind(JobStatus::Pending.id())
            .bind(JobStatus::Completed.id())
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }
}
