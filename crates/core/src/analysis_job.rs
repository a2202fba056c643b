//! Analysis job model and state machine.
//!
//! This module lives in `core` (zero internal deps) so the Postgres store, the
//! in-memory store and the HTTP layer all validate against the same rules.

use serde::{Deserialize, Serialize};

use crate::detection::DetectedRegion;
use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Attempts after which the worker refuses to claim a job.
pub const MAX_RETRY_COUNT: i32 = 3;

/// Error message written by cancel and cancel-all. Stable: clients match on it.
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Maximum stored length of a worker error message, in characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Job status. IDs match the `analysis_job_statuses` seed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum JobStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [Self::Pending, Self::Processing, Self::Completed, Self::Failed];
    pub const ACTIVE: [JobStatus; 2] = [Self::Pending, Self::Processing];

    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// `completed` and `failed` see no further automatic transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// A documented job mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// Worker starts an attempt.
    Claim,
    /// Worker reports success.
    Complete,
    /// Worker reports failure.
    Fail,
    /// Operator cancel; advisory, from any state.
    Cancel,
    /// Operator retry; any state, bumps `retry_count`.
    Retry,
    /// Operator re-run of a completed job.
    Reprocess,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
            Self::Reprocess => "reprocess",
        }
    }

    /// Statuses this action may start from.
    pub fn allowed_from(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Self::Claim => &[Pending],
            Self::Complete | Self::Fail => &[Processing],
            Self::Cancel | Self::Retry => &JobStatus::ALL,
            Self::Reprocess => &[Completed],
        }
    }

    pub fn target(self) -> JobStatus {
        match self {
            Self::Claim => JobStatus::Processing,
            Self::Complete => JobStatus::Completed,
            Self::Fail | Self::Cancel => JobStatus::Failed,
            Self::Retry | Self::Reprocess => JobStatus::Pending,
        }
    }
}

/// Resolve the status an action leads to, or reject the transition.
pub fn transition(from: JobStatus, action: JobAction) -> Result<JobStatus, CoreError> {
    if action.allowed_from().contains(&from) {
        Ok(action.target())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.as_str(),
            action: action.as_str(),
        })
    }
}

/// Truncate a worker error message to [`MAX_ERROR_MESSAGE_LEN`] characters.
pub fn truncate_error_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// One dispatchable analysis of one plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: DbId,
    pub plate_id: DbId,
    pub status: JobStatus,
    pub media_ref: String,
    pub expected_count: Option<i32>,
    pub manual_bboxes: Option<Vec<DetectedRegion>>,
    pub detected_bboxes: Option<Vec<DetectedRegion>>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl AnalysisJob {
    /// Expected embryo count, with zero meaning "no expectation".
    pub fn expectation(&self) -> Option<u32> {
        self.expected_count.filter(|&n| n > 0).map(|n| n as u32)
    }

    /// True when the job was cancelled rather than failed by the worker.
    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Failed && self.error_message.as_deref() == Some(CANCELLED_MESSAGE)
    }

    /// Check the timestamp and counter invariants for the current status.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.retry_count < 0 {
            return Err(CoreError::Validation(format!(
                "job {}: retry_count must not be negative",
                self.id
            )));
        }
        let ok = match self.status {
            JobStatus::Pending => self.started_at.is_none() && self.completed_at.is_none(),
            JobStatus::Processing => self.started_at.is_some() && self.completed_at.is_none(),
            JobStatus::Completed | JobStatus::Failed => self.completed_at.is_some(),
        };
        if !ok {
            return Err(CoreError::Validation(format!(
                "job {}: timestamps inconsistent with status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn job(status: JobStatus) -> AnalysisJob {
        AnalysisJob {
            id: 1,
            plate_id: 10,
            status,
            media_ref: "plate.mp4".to_string(),
            expected_count: Some(4),
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
    fn status_ids_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_id(status.id()), Some(status));
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_id(9), None);
        assert_eq!(JobStatus::parse("cancelled"), None);
    }

    #[test]
    fn worker_transitions() {
        use JobAction::*;
        use JobStatus::*;
        assert_eq!(transition(Pending, Claim).unwrap(), Processing);
        assert_eq!(transition(Processing, Complete).unwrap(), Completed);
        assert_eq!(transition(Processing, Fail).unwrap(), Failed);
        assert!(transition(Failed, Claim).is_err());
        assert!(transition(Pending, Complete).is_err());
        assert!(transition(Completed, Fail).is_err());
    }

    #[test]
    fn cancel_and_retry_apply_from_any_state() {
        for status in JobStatus::ALL {
            assert_eq!(transition(status, JobAction::Cancel).unwrap(), JobStatus::Failed);
            assert_eq!(transition(status, JobAction::Retry).unwrap(), JobStatus::Pending);
        }
    }

    #[test]
    fn reprocess_only_from_completed() {
        assert!(transition(JobStatus::Completed, JobAction::Reprocess).is_ok());
        let err = transition(JobStatus::Failed, JobAction::Reprocess).unwrap_err();
        assert!(err.to_string().contains("reprocess"));
    }

    #[test]
    fn error_message_is_truncated_on_char_boundary() {
        let long = "é".repeat(600);
        let out = truncate_error_message(&long);
        assert_eq!(out.chars().count(), MAX_ERROR_MESSAGE_LEN);
        assert_eq!(truncate_error_message("boom"), "boom");
    }

    #[test]
    fn invariants_follow_status() {
        let pending = job(JobStatus::Pending);
        assert!(pending.validate().is_ok());

        let mut processing = job(JobStatus::Processing);
        assert!(processing.validate().is_err());
        processing.started_at = Some(Utc::now());
        assert!(processing.validate().is_ok());

        let mut cancelled = job(JobStatus::Failed);
        cancelled.completed_at = Some(Utc::now());
        cancelled.error_message = Some(CANCELLED_MESSAGE.to_string());
        assert!(cancelled.validate().is_ok());
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn zero_expected_count_means_no_expectation() {
        let mut j = job(JobStatus::Pending);
        assert_eq!(j.expectation(), Some(4));
        j.expected_count = Some(0);
        assert_eq!(j.expectation(), None);
    }
}
