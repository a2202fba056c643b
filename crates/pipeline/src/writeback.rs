//! Worker write-back: claim, complete and fail, keyed by the attempt number
//! the worker saw at claim time.

use std::sync::Arc;

use embryoscore_core::analysis_job::AnalysisJob;
use embryoscore_core::scoring::{NewEmbryoScore, ScoreInput, ScoreWeights};
use embryoscore_core::types::DbId;

use crate::store::{JobStore, StoreError};

#[derive(Clone)]
pub struct WorkerWriteBack {
    store: Arc<dyn JobStore>,
}

impl WorkerWriteBack {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn claim(&self, job_id: DbId) -> Result<AnalysisJob, StoreError> {
        let job = self.store.claim(job_id).await?;
        tracing::info!(job_id, attempt = job.retry_count, "Job claimed by worker");
        Ok(job)
    }

    /// Combine the sub-scores server-side and complete the attempt.
    pub async fn complete(
        &self,
        job_id: DbId,
        attempt: i32,
        inputs: &[ScoreInput],
        weights: Option<ScoreWeights>,
    ) -> Result<AnalysisJob, StoreError> {
        let weights = weights.unwrap_or_default();
        weights.validate()?;
        let scores: Vec<NewEmbryoScore> = inputs
            .iter()
            .map(|input| NewEmbryoScore::from_input(input, weights))
            .collect();

        let job = self.store.complete(job_id, attempt, &scores).await?;
        tracing::info!(job_id, attempt, scores = scores.len(), "Job completed by worker");
        Ok(job)
    }

    pub async fn fail(
        &self,
        job_id: DbId,
        attempt: i32,
        message: &str,
    ) -> Result<AnalysisJob, StoreError> {
        let job = self.store.fail(job_id, attempt, message).await?;
        tracing::info!(job_id, attempt, "Job failed by worker");
        Ok(job)
    }
}
