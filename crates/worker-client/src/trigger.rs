use async_trait::async_trait;
use embryoscore_core::types::DbId;

use crate::api::{TriggerResponse, WorkerApi, WorkerApiError};

/// Something that can start an analysis run for a job.
///
/// The dispatcher only depends on this trait so tests can swap in a mock.
#[async_trait]
pub trait WorkerTrigger: Send + Sync {
    async fn trigger(&self, job_id: DbId) -> Result<TriggerResponse, WorkerApiError>;
}

#[async_trait]
impl WorkerTrigger for WorkerApi {
    async fn trigger(&self, job_id: DbId) -> Result<TriggerResponse, WorkerApiError> {
        WorkerApi::trigger(self, job_id).await
    }
}
