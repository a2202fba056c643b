//! Queue-wide summary of active analysis jobs.

use serde::Serialize;

use crate::analysis_job::{AnalysisJob, JobStatus};
use crate::types::Timestamp;

/// Ambient queue indicator for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub processing: usize,
    /// Earliest `started_at` among processing jobs.
    pub oldest_started_at: Option<Timestamp>,
    /// `expected_count` of the last processing job in creation order. A UI
    /// hint only.
    pub latest_expected_count: Option<i32>,
}

impl QueueSummary {
    pub fn active(&self) -> usize {
        self.pending + self.processing
    }

    pub fn is_idle(&self) -> bool {
        self.active() == 0
    }
}

/// Summarise active jobs ordered by `created_at` ascending. Terminal jobs are
/// ignored.
pub fn summarize(jobs: &[AnalysisJob]) -> QueueSummary {
    let mut summary = QueueSummary::default();
    for job in jobs {
        match job.status {
            JobStatus::Pending => summary.pending += 1,
            JobStatus::Processing => {
                summary.processing += 1;
                if let Some(started) = job.started_at {
                    summary.oldest_started_at = Some(match summary.oldest_started_at {
                        Some(current) => current.min(started),
                        None => started,
                    });
                }
                if job.expected_count.is_some() {
                    summary.latest_expected_count = job.expected_count;
                }
            }
            JobStatus::Completed | JobStatus::Failed => {}
        }
    }
    summary
}
