use async_trait::async_trait;
use embryoscore_core::analysis_job::{AnalysisJob, JobAction, JobStatus};
use embryoscore_core::correction::Submission;
use embryoscore_core::detection::DetectedRegion;
use embryoscore_core::scoring::{EmbryoScore, NewEmbryoScore};
use embryoscore_core::types::{DbId, Timestamp};
use embryoscore_db::models::analysis_job::CreateAnalysisJob;
use embryoscore_db::models::embryo::{CreatePlate, Embryo, Plate};
use embryoscore_db::repositories::{AnalysisJobRepo, EmbryoRepo, EmbryoScoreRepo, PlateRepo};
use sqlx::PgPool;

use super::{explain_miss, label_codes, submission_refused, JobStore, StoreError};

/// [`JobStore`] backed by the Postgres repositories.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Turn a conditioned update's `None` into the matching error.
    async fn resolve(
        &self,
        id: DbId,
        action: JobAction,
        updated: Option<AnalysisJob>,
    ) -> Result<AnalysisJob, StoreError> {
        if let Some(job) = updated {
            return Ok(job);
        }
        let current = self.get(id).await?;
        Err(explain_miss(&current, action))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(embryoscore_db::health_check(&self.pool).await?)
    }

    async fn create_plate(&self, input: &CreatePlate) -> Result<Plate, StoreError> {
        Ok(PlateRepo::create(&self.pool, input).await?)
    }

    async fn embryos(&self, plate_id: DbId) -> Result<Vec<Embryo>, StoreError> {
        Ok(EmbryoRepo::list_for_plate(&self.pool, plate_id).await?)
    }

    async fn ensure_embryo(&self, plate_id: DbId, position: i32) -> Result<Embryo, StoreError> {
        if PlateRepo::find_by_id(&self.pool, plate_id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "Plate",
                id: plate_id,
            });
        }
        Ok(EmbryoRepo::ensure(&self.pool, plate_id, position).await?)
    }

    async fn create(&self, input: &CreateAnalysisJob) -> Result<AnalysisJob, StoreError> {
        input.validate()?;
        if PlateRepo::find_by_id(&self.pool, input.plate_id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "Plate",
                id: input.plate_id,
            });
        }
        Ok(AnalysisJobRepo::create(&self.pool, input).await?)
    }

    async fn find(&self, id: DbId) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(AnalysisJobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list(
        &self,
        statuses: Option<&[JobStatus]>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(AnalysisJobRepo::list(&self.pool, statuses, limit, offset).await?)
    }

    async fn latest_for_plates(&self, plate_ids: &[DbId]) -> Result<Vec<AnalysisJob>, StoreError> {
        let mut jobs = AnalysisJobRepo::latest_for_plates(&self.pool, plate_ids).await?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn jobs_in_status(&self, statuses: &[JobStatus]) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(AnalysisJobRepo::jobs_in_status(&self.pool, statuses).await?)
    }

    async fn jobs_created_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(AnalysisJobRepo::jobs_created_between(&self.pool, from, to).await?)
    }

    async fn current_scores(&self, embryo_ids: &[DbId]) -> Result<Vec<EmbryoScore>, StoreError> {
        Ok(EmbryoScoreRepo::current_for_embryos(&self.pool, embryo_ids).await?)
    }

    async fn score_history(&self, embryo_id: DbId) -> Result<Vec<EmbryoScore>, StoreError> {
        Ok(EmbryoScoreRepo::history(&self.pool, embryo_id).await?)
    }

    async fn set_detected(
        &self,
        id: DbId,
        regions: &[DetectedRegion],
    ) -> Result<AnalysisJob, StoreError> {
        AnalysisJobRepo::set_detected_bboxes(&self.pool, id, regions)
            .await?
            .ok_or(StoreError::job_not_found(id))
    }

    async fn submit(&self, id: DbId, submission: &Submission) -> Result<AnalysisJob, StoreError> {
        submission.validate()?;
        let labels = label_codes(submission);
        match AnalysisJobRepo::submit_manual_bboxes(&self.pool, id, &submission.regions, &labels)
            .await?
        {
            Some(job) => Ok(job),
            None => Err(submission_refused(&self.get(id).await?)),
        }
    }

    async fn claim(&self, id: DbId) -> Result<AnalysisJob, StoreError> {
        let updated = AnalysisJobRepo::claim(&self.pool, id).await?;
        self.resolve(id, JobAction::Claim, updated).await
    }

    async fn complete(
        &self,
        id: DbId,
        attempt: i32,
        scores: &[NewEmbryoScore],
    ) -> Result<AnalysisJob, StoreError> {
        let updated = AnalysisJobRepo::complete(&self.pool, id, attempt, scores).await?;
        self.resolve(id, JobAction::Complete, updated).await
    }

    async fn fail(&self, id: DbId, attempt: i32, message: &str) -> Result<AnalysisJob, StoreError> {
        let updated = AnalysisJobRepo::fail(&self.pool, id, attempt, message).await?;
        self.resolve(id, JobAction::Fail, updated).await
    }

    async fn cancel(&self, id: DbId) -> Result<AnalysisJob, StoreError> {
        AnalysisJobRepo::cancel(&self.pool, id)
            .await?
            .ok_or(StoreError::job_not_found(id))
    }

    async fn cancel_all(&self) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(AnalysisJobRepo::cancel_all(&self.pool).await?)
    }

    async fn retry(&self, id: DbId, observed_retry_count: i32) -> Result<AnalysisJob, StoreError> {
        let updated = AnalysisJobRepo::retry(&self.pool, id, observed_retry_count).await?;
        self.resolve(id, JobAction::Retry, updated).await
    }

    async fn reprocess(&self, id: DbId) -> Result<AnalysisJob, StoreError> {
        let updated = AnalysisJobRepo::reprocess(&self.pool, id).await?;
        self.resolve(id, JobAction::Reprocess, updated).await
    }
}
