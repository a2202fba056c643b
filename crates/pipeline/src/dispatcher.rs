//! Fire-and-forget worker dispatch.
//!
//! The dispatcher hands a pending job to the external worker and returns.
//! It never changes job status itself: the worker claims, completes or fails
//! the job through the write-back path. A failed trigger leaves the job
//! pending so the caller can dispatch again without spending a retry.

use std::sync::Arc;

use embryoscore_core::analysis_job::{AnalysisJob, JobStatus};
use embryoscore_core::error::CoreError;
use embryoscore_core::types::DbId;
use embryoscore_worker_client::{TriggerResponse, WorkerTrigger};

use crate::error::PipelineError;
use crate::store::{JobStore, StoreError};

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    trigger: Arc<dyn WorkerTrigger>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, trigger: Arc<dyn WorkerTrigger>) -> Self {
        Self { store, trigger }
    }

    /// Trigger the worker for a pending job.
    pub async fn dispatch(&self, job_id: DbId) -> Result<TriggerResponse, PipelineError> {
        let job = self.store.get(job_id).await?;
        self.dispatch_job(&job).await
    }

    /// Trigger the worker for a job the caller already loaded.
    pub async fn dispatch_job(&self, job: &AnalysisJob) -> Result<TriggerResponse, PipelineError> {
        if job.status != JobStatus::Pending {
            return Err(StoreError::Invalid(CoreError::InvalidTransition {
                from: job.status.as_str(),
                action: "dispatch",
            })
            .into());
        }

        match self.trigger.trigger(job.id).await {
            Ok(response) => {
                if response.success {
                    tracing::info!(job_id = job.id, retry_count = job.retry_count, "Job dispatched to worker");
                } else {
                    tracing::warn!(
                        job_id = job.id,
                        error = response.error.as_deref().unwrap_or("unknown"),
                        "Worker reported failure for dispatched job",
                    );
                }
                Ok(response)
            }
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Worker trigger failed, job left pending");
                Err(e.into())
            }
        }
    }
}
