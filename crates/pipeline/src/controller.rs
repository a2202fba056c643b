//! Operator mutations: retry, reprocess, cancel, cancel-all and correction
//! submission.
//!
//! Every mutation runs under an [`InFlightGuard`] permit keyed by job and
//! mutation, so the same action cannot be submitted twice before the first
//! one resolves. Different mutations on one job do not block each other: a
//! cancel goes through while a retry is still waiting on the worker.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use embryoscore_core::analysis_job::AnalysisJob;
use embryoscore_core::correction::Submission;
use embryoscore_core::types::DbId;

use crate::dispatcher::Dispatcher;
use crate::error::PipelineError;
use crate::store::JobStore;

// ---------------------------------------------------------------------------
// Double-submission guard
// ---------------------------------------------------------------------------

/// Operator mutations on a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    Dispatch,
    Retry,
    Reprocess,
    Cancel,
    Submit,
}

impl Mutation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Retry => "retry",
            Self::Reprocess => "reprocess",
            Self::Cancel => "cancel",
            Self::Submit => "submit",
        }
    }
}

/// What a permit locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKey {
    Job(DbId, Mutation),
    CancelAll,
}

impl std::fmt::Display for GuardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Job(id, mutation) => write!(f, "a {} of job {id}", mutation.as_str()),
            Self::CancelAll => f.write_str("cancel-all"),
        }
    }
}

/// Synchronous set of in-flight mutation keys.
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    held: Arc<Mutex<HashSet<GuardKey>>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the permit for `key`, or fail with [`PipelineError::Busy`].
    pub fn acquire(&self, key: GuardKey) -> Result<InFlightPermit, PipelineError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key) {
            tracing::debug!(%key, "Rejected duplicate submission");
            return Err(PipelineError::Busy(key.to_string()));
        }
        Ok(InFlightPermit {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, key: GuardKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct InFlightPermit {
    held: Arc<Mutex<HashSet<GuardKey>>>,
    key: GuardKey,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct JobController {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    guard: InFlightGuard,
}

impl JobController {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            guard: InFlightGuard::new(),
        }
    }

    pub fn guard(&self) -> &InFlightGuard {
        &self.guard
    }

    /// Reset the job to `pending` with one more attempt, then dispatch it.
    ///
    /// The reset is conditioned on the `retry_count` read here. If the
    /// trigger fails the job stays pending with the new count and the error
    /// is returned.
    pub async fn retry(&self, job_id: DbId) -> Result<AnalysisJob, PipelineError> {
        let _permit = self.guard.acquire(GuardKey::Job(job_id, Mutation::Retry))?;
        let current = self.store.get(job_id).await?;
        let job = self.store.retry(job_id, current.retry_count).await?;
        tracing::info!(job_id, retry_count = job.retry_count, "Job reset for retry");
        self.dispatcher.dispatch_job(&job).await?;
        Ok(job)
    }

    /// Re-run a completed job without spending a retry.
    pub async fn reprocess(&self, job_id: DbId) -> Result<AnalysisJob, PipelineError> {
        let _permit = self.guard.acquire(GuardKey::Job(job_id, Mutation::Reprocess))?;
        let job = self.store.reprocess(job_id).await?;
        tracing::info!(job_id, "Job reset for reprocessing");
        self.dispatcher.dispatch_job(&job).await?;
        Ok(job)
    }

    /// Dispatch a pending job under the guard.
    pub async fn dispatch(&self, job_id: DbId) -> Result<AnalysisJob, PipelineError> {
        let _permit = self.guard.acquire(GuardKey::Job(job_id, Mutation::Dispatch))?;
        let job = self.store.get(job_id).await?;
        self.dispatcher.dispatch_job(&job).await?;
        Ok(job)
    }

    /// Advisory cancel. The worker is not interrupted; its later writes are
    /// dropped as stale.
    pub async fn cancel(&self, job_id: DbId) -> Result<AnalysisJob, PipelineError> {
        let _permit = self.guard.acquire(GuardKey::Job(job_id, Mutation::Cancel))?;
        let job = self.store.cancel(job_id).await?;
        tracing::info!(job_id, "Job cancelled");
        Ok(job)
    }

    pub async fn cancel_all(&self) -> Result<Vec<AnalysisJob>, PipelineError> {
        let _permit = self.guard.acquire(GuardKey::CancelAll)?;
        let jobs = self.store.cancel_all().await?;
        tracing::info!(cancelled = jobs.len(), "Cancelled all active jobs");
        Ok(jobs)
    }

    /// Persist the operator's corrected regions and labels.
    pub async fn submit(
        &self,
        job_id: DbId,
        submission: &Submission,
    ) -> Result<AnalysisJob, PipelineError> {
        let _permit = self.guard.acquire(GuardKey::Job(job_id, Mutation::Submit))?;
        let job = self.store.submit(job_id, submission).await?;
        tracing::info!(
            job_id,
            regions = submission.regions.len(),
            classified = submission.classifications().count(),
            "Corrections submitted",
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permit_blocks_until_dropped() {
        let guard = InFlightGuard::new();
        let retry = GuardKey::Job(7, Mutation::Retry);
        let permit = guard.acquire(retry).unwrap();
        assert!(matches!(guard.acquire(retry), Err(PipelineError::Busy(_))));
        // Other jobs and other mutations are independent.
        let _other = guard.acquire(GuardKey::Job(8, Mutation::Retry)).unwrap();
        let _cancel = guard.acquire(GuardKey::Job(7, Mutation::Cancel)).unwrap();
        let _all = guard.acquire(GuardKey::CancelAll).unwrap();

        drop(permit);
        assert!(!guard.is_held(retry));
        assert!(guard.acquire(retry).is_ok());
    }

    #[test]
    fn busy_message_names_the_mutation() {
        let guard = InFlightGuard::new();
        let _permit = guard.acquire(GuardKey::Job(2, Mutation::Reprocess)).unwrap();
        let busy = guard.acquire(GuardKey::Job(2, Mutation::Reprocess)).unwrap_err();
        assert!(busy.to_string().contains("a reprocess of job 2"), "{busy}");
    }
}
