//! The job store seam.
//!
//! [`JobStore`] is the single source of truth for jobs, embryos and scores.
//! Every mutation is one of the documented transitions; conditioned writes
//! whose precondition no longer holds come back as [`StoreError::Stale`]
//! and leave the stored state untouched.

mod memory;
mod pg;

pub use memory::MemoryJobStore;
pub use pg::PgJobStore;

use async_trait::async_trait;
use embryoscore_core::analysis_job::{AnalysisJob, JobAction, JobStatus, MAX_RETRY_COUNT};
use embryoscore_core::correction::Submission;
use embryoscore_core::detection::DetectedRegion;
use embryoscore_core::error::CoreError;
use embryoscore_core::scoring::{EmbryoScore, NewEmbryoScore};
use embryoscore_core::types::{DbId, Timestamp};
use embryoscore_db::models::analysis_job::CreateAnalysisJob;
use embryoscore_db::models::embryo::{CreatePlate, Embryo, Plate};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// A conditioned write found the row in a different state.
    #[error("Stale write: {0}")]
    Stale(String),

    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub(crate) fn job_not_found(id: DbId) -> Self {
        Self::NotFound {
            entity: "AnalysisJob",
            id,
        }
    }
}

/// Persistent store for plates, embryos, analysis jobs and scores.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Cheap liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    // -- plates and embryos --

    async fn create_plate(&self, input: &CreatePlate) -> Result<Plate, StoreError>;

    async fn embryos(&self, plate_id: DbId) -> Result<Vec<Embryo>, StoreError>;

    /// The embryo at `position` on the plate, created if missing.
    async fn ensure_embryo(&self, plate_id: DbId, position: i32) -> Result<Embryo, StoreError>;

    // -- job reads --

    async fn create(&self, input: &CreateAnalysisJob) -> Result<AnalysisJob, StoreError>;

    async fn find(&self, id: DbId) -> Result<Option<AnalysisJob>, StoreError>;

    /// Newest first, optionally filtered by status.
    async fn list(
        &self,
        statuses: Option<&[JobStatus]>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<AnalysisJob>, StoreError>;

    /// Newest job per plate, newest first overall.
    async fn latest_for_plates(&self, plate_ids: &[DbId]) -> Result<Vec<AnalysisJob>, StoreError>;

    /// Jobs in `{pending, processing}`, oldest first.
    async fn active_jobs(&self) -> Result<Vec<AnalysisJob>, StoreError> {
        self.jobs_in_status(&JobStatus::ACTIVE).await
    }

    /// Jobs in any of `statuses`, oldest first.
    async fn jobs_in_status(&self, statuses: &[JobStatus]) -> Result<Vec<AnalysisJob>, StoreError>;

    /// Jobs created in `[from, to)`, oldest first.
    async fn jobs_created_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<AnalysisJob>, StoreError>;

    // -- score reads --

    /// Current scores for the given embryos, newest first.
    async fn current_scores(&self, embryo_ids: &[DbId]) -> Result<Vec<EmbryoScore>, StoreError>;

    /// Every score of one embryo, newest first.
    async fn score_history(&self, embryo_id: DbId) -> Result<Vec<EmbryoScore>, StoreError>;

    // -- detection and correction --

    async fn set_detected(
        &self,
        id: DbId,
        regions: &[DetectedRegion],
    ) -> Result<AnalysisJob, StoreError>;

    /// Store the operator regions as `manual_bboxes` and write the labels
    /// onto the plate's embryos. Only a pending job accepts a submission.
    async fn submit(&self, id: DbId, submission: &Submission) -> Result<AnalysisJob, StoreError>;

    // -- worker transitions --

    async fn claim(&self, id: DbId) -> Result<AnalysisJob, StoreError>;

    async fn complete(
        &self,
        id: DbId,
        attempt: i32,
        scores: &[NewEmbryoScore],
    ) -> Result<AnalysisJob, StoreError>;

    async fn fail(&self, id: DbId, attempt: i32, message: &str) -> Result<AnalysisJob, StoreError>;

    // -- operator transitions --

    async fn cancel(&self, id: DbId) -> Result<AnalysisJob, StoreError>;

    /// Cancel every active job in one atomic update.
    async fn cancel_all(&self) -> Result<Vec<AnalysisJob>, StoreError>;

    /// Conditioned on the `retry_count` the caller observed.
    async fn retry(&self, id: DbId, observed_retry_count: i32) -> Result<AnalysisJob, StoreError>;

    async fn reprocess(&self, id: DbId) -> Result<AnalysisJob, StoreError>;

    /// Load a job or fail with [`StoreError::NotFound`].
    async fn get(&self, id: DbId) -> Result<AnalysisJob, StoreError> {
        self.find(id).await?.ok_or(StoreError::job_not_found(id))
    }
}

/// Explain why a conditioned `action` on `current` did not apply.
///
/// Worker writes and retries that lost a race are stale. Actions the state
/// machine never allows from the current status are invalid, as is a claim
/// past the retry limit or a submission after the job left `pending`.
pub(crate) fn explain_miss(current: &AnalysisJob, action: JobAction) -> StoreError {
    match action {
        JobAction::Claim if current.retry_count >= MAX_RETRY_COUNT => {
            StoreError::Invalid(CoreError::Conflict(format!(
                "job {} reached the retry limit ({MAX_RETRY_COUNT})",
                current.id
            )))
        }
        JobAction::Reprocess => match embryoscore_core::analysis_job::transition(current.status, action) {
            Err(e) => StoreError::Invalid(e),
            Ok(_) => stale(current, action),
        },
        _ => stale(current, action),
    }
}

/// Submissions are frozen once the job leaves `pending`.
pub(crate) fn submission_refused(current: &AnalysisJob) -> StoreError {
    StoreError::Invalid(CoreError::Conflict(format!(
        "job {} is {}; corrections are accepted only while pending",
        current.id, current.status
    )))
}

fn stale(current: &AnalysisJob, action: JobAction) -> StoreError {
    tracing::warn!(
        job_id = current.id,
        status = %current.status,
        retry_count = current.retry_count,
        action = action.as_str(),
        "Dropping stale job write",
    );
    StoreError::Stale(format!(
        "job {} is {} (attempt {}); {} not applied",
        current.id,
        current.status,
        current.retry_count,
        action.as_str()
    ))
}

/// Label codes in region order, as written onto embryo records.
pub(crate) fn label_codes(submission: &Submission) -> Vec<Option<&'static str>> {
    submission
        .labels
        .iter()
        .map(|label| label.map(|l| l.code()))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn job(status: JobStatus, retry_count: i32) -> AnalysisJob {
        AnalysisJob {
            id: 3,
            plate_id: 1,
            status,
            media_ref: "p.mp4".to_string(),
            expected_count: None,
            manual_bboxes: None,
            detected_bboxes: None,
            retry_count,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn claim_past_retry_limit_is_a_conflict() {
        let err = explain_miss(&job(JobStatus::Pending, MAX_RETRY_COUNT), JobAction::Claim);
        assert!(matches!(err, StoreError::Invalid(CoreError::Conflict(_))));
    }

    #[test]
    fn lost_worker_race_is_stale() {
        let err = explain_miss(&job(JobStatus::Failed, 0), JobAction::Complete);
        assert!(matches!(err, StoreError::Stale(_)));
        let err = explain_miss(&job(JobStatus::Processing, 0), JobAction::Claim);
        assert!(matches!(err, StoreError::Stale(_)));
    }

    #[test]
    fn reprocess_from_pending_is_invalid() {
        let err = explain_miss(&job(JobStatus::Pending, 0), JobAction::Reprocess);
        assert!(matches!(
            err,
            StoreError::Invalid(CoreError::InvalidTransition { .. })
        ));
    }
}
