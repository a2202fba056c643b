use embryoscore_core::detection::DetectionError;
use embryoscore_worker_client::WorkerApiError;

use crate::store::StoreError;

/// Errors surfaced by the pipeline services.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The worker trigger failed; the job was left as it was.
    #[error("Worker dispatch failed: {0}")]
    Dispatch(#[from] WorkerApiError),

    #[error("Detection failed: {0}")]
    Detection(#[from] DetectionError),

    /// The same mutation is already in flight.
    #[error("{0} is already in progress")]
    Busy(String),

    /// A watch was stopped before its batch settled.
    #[error("Watch cancelled")]
    Cancelled,
}
