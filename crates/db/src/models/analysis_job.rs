//! Analysis job rows and DTOs.

use embryoscore_core::analysis_job::{AnalysisJob, JobStatus};
use embryoscore_core::detection::{validate_regions, DetectedRegion};
use embryoscore_core::error::CoreError;
use embryoscore_core::types::{DbId, Timestamp};
use serde::Deserialize;
use sqlx::FromRow;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

/// A raw row from the `analysis_jobs` table. Converted into the validated
/// [`AnalysisJob`] before leaving the repository.
#[derive(Debug, Clone, FromRow)]
pub struct AnalysisJobRow {
    pub id: DbId,
    pub plate_id: DbId,
    pub status_id: StatusId,
    pub media_ref: String,
    pub expected_count: Option<i32>,
    pub manual_bboxes: Option<serde_json::Value>,
    pub detected_bboxes: Option<serde_json::Value>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<AnalysisJobRow> for AnalysisJob {
    type Error = CoreError;

    fn try_from(row: AnalysisJobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_id(row.status_id).ok_or_else(|| {
            CoreError::Validation(format!("job {}: unknown status_id {}", row.id, row.status_id))
        })?;
        let job = AnalysisJob {
            id: row.id,
            plate_id: row.plate_id,
            status,
            media_ref: row.media_ref,
            expected_count: row.expected_count,
            manual_bboxes: decode_regions(row.id, "manual_bboxes", row.manual_bboxes)?,
            detected_bboxes: decode_regions(row.id, "detected_bboxes", row.detected_bboxes)?,
            retry_count: row.retry_count,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        };
        job.validate()?;
        Ok(job)
    }
}

fn decode_regions(
    job_id: DbId,
    column: &str,
    value: Option<serde_json::Value>,
) -> Result<Option<Vec<DetectedRegion>>, CoreError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let regions: Vec<DetectedRegion> = serde_json::from_value(value)
        .map_err(|e| CoreError::Validation(format!("job {job_id}: malformed {column}: {e}")))?;
    validate_regions(&regions)?;
    Ok(Some(regions))
}

/// Convert a fetched row, reporting shape violations as decode errors.
pub fn into_job(row: AnalysisJobRow) -> Result<AnalysisJob, sqlx::Error> {
    AnalysisJob::try_from(row).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// DTO for creating a job via `POST /api/v1/jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnalysisJob {
    pub plate_id: DbId,
    pub media_ref: String,
    pub expected_count: Option<i32>,
}

impl CreateAnalysisJob {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.media_ref.trim().is_empty() {
            return Err(CoreError::Validation("media_ref must not be empty".to_string()));
        }
        if self.expected_count.is_some_and(|n| n < 0) {
            return Err(CoreError::Validation(
                "expected_count must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use embryoscore_core::detection::RegionConfidence;

    use super::*;

    fn row() -> AnalysisJobRow {
        AnalysisJobRow {
            id: 5,
            plate_id: 2,
            status_id: 1,
            media_ref: "plates/2.mp4".to_string(),
            expected_count: Some(3),
            manual_bboxes: None,
            detected_bboxes: None,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn valid_row_converts() {
        let region = DetectedRegion::manual(40.0, 50.0, 12.0, 640, 480);
        let mut r = row();
        r.manual_bboxes = Some(serde_json::to_value(vec![region.clone()]).unwrap());
        let job = AnalysisJob::try_from(r).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.manual_bboxes, Some(vec![region]));
        assert_eq!(job.manual_bboxes.unwrap()[0].confidence_bucket, RegionConfidence::Manual);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut r = row();
        r.status_id = 42;
        assert!(AnalysisJob::try_from(r).is_err());
    }

    #[test]
    fn malformed_bboxes_are_rejected() {
        let mut r = row();
        r.detected_bboxes = Some(serde_json::json!([{"center_x_pct": "left"}]));
        let err = AnalysisJob::try_from(r).unwrap_err();
        assert!(err.to_string().contains("detected_bboxes"));
    }

    #[test]
    fn out_of_range_bboxes_are_rejected() {
        let mut region = DetectedRegion::manual(40.0, 50.0, 12.0, 640, 480);
        region.center_y_pct = 140.0;
        let mut r = row();
        r.manual_bboxes = Some(serde_json::to_value(vec![region]).unwrap());
        assert!(AnalysisJob::try_from(r).is_err());
    }

    #[test]
    fn inconsistent_timestamps_are_rejected() {
        let mut r = row();
        r.completed_at = Some(Utc::now());
        assert!(AnalysisJob::try_from(r).is_err());
    }
}
