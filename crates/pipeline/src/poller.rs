//! Headless job and score watches.
//!
//! A watch re-fetches on a fixed ticker until its whole batch is settled.
//! When an [`EventBus`] is attached, a matching change event triggers an
//! immediate re-fetch; without one (or after the bus closes) the ticker
//! alone keeps the watch correct. Fetch errors are logged and retried on the
//! next tick.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use embryoscore_core::analysis_job::AnalysisJob;
use embryoscore_core::scoring::EmbryoScore;
use embryoscore_core::sync::{all_settled, latest_per_key};
use embryoscore_core::types::DbId;
use embryoscore_events::{ChangeEvent, ChangeTable, EventBus};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::store::{JobStore, StoreError};

enum Wake {
    Changed,
    Closed,
}

/// Wait for a change event accepted by `relevant`.
async fn next_change(
    changes: &mut Option<broadcast::Receiver<ChangeEvent>>,
    relevant: &(dyn Fn(&ChangeEvent) -> bool + Sync),
) -> Wake {
    let Some(rx) = changes.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) if relevant(&event) => return Wake::Changed,
            Ok(_) => continue,
            // Something may have been missed; re-fetch to be safe.
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Change receiver lagged");
                return Wake::Changed;
            }
            Err(RecvError::Closed) => return Wake::Closed,
        }
    }
}

#[derive(Clone)]
pub struct Poller {
    store: Arc<dyn JobStore>,
    bus: Option<Arc<EventBus>>,
    interval: Duration,
}

impl Poller {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            store,
            bus: None,
            interval,
        }
    }

    /// Invalidate watches early on matching change events.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Watch one job until it reaches a terminal status.
    pub async fn watch_job(
        &self,
        job_id: DbId,
        cancel: &CancellationToken,
    ) -> Result<AnalysisJob, PipelineError> {
        let store = &self.store;
        let job = self
            .poll_until(
                &|e: &ChangeEvent| e.table == ChangeTable::AnalysisJobs && e.row_id == job_id,
                cancel,
                || async move { store.find(job_id).await },
                |job: &Option<AnalysisJob>| job.as_ref().is_some_and(|j| j.status.is_terminal()),
            )
            .await?;
        job.ok_or(StoreError::job_not_found(job_id).into())
    }

    /// Watch the latest job of each plate until every one is terminal.
    pub async fn watch_plates(
        &self,
        plate_ids: &[DbId],
        cancel: &CancellationToken,
    ) -> Result<HashMap<DbId, AnalysisJob>, PipelineError> {
        let store = &self.store;
        self.poll_until(
            &|e: &ChangeEvent| e.touches(ChangeTable::AnalysisJobs, plate_ids),
            cancel,
            || async move {
                let rows = store.latest_for_plates(plate_ids).await?;
                Ok(latest_per_key(rows, |j| j.plate_id, |j| j.created_at))
            },
            |latest: &HashMap<DbId, AnalysisJob>| {
                all_settled(plate_ids, latest, |j| j.status.is_terminal())
            },
        )
        .await
    }

    /// Watch embryos until each has a current score.
    pub async fn watch_scores(
        &self,
        embryo_ids: &[DbId],
        cancel: &CancellationToken,
    ) -> Result<HashMap<DbId, EmbryoScore>, PipelineError> {
        let store = &self.store;
        self.poll_until(
            &|e: &ChangeEvent| e.touches(ChangeTable::EmbryoScores, embryo_ids),
            cancel,
            || async move {
                let rows = store.current_scores(embryo_ids).await?;
                Ok(latest_per_key(rows, |s| s.embryo_id, |s| s.created_at))
            },
            |scores: &HashMap<DbId, EmbryoScore>| all_settled(embryo_ids, scores, |_| true),
        )
        .await
    }

    async fn poll_until<T, F, Fut, S>(
        &self,
        relevant: &(dyn Fn(&ChangeEvent) -> bool + Sync),
        cancel: &CancellationToken,
        mut fetch: F,
        settled: S,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
        S: Fn(&T) -> bool,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut changes = self.bus.as_ref().map(|bus| bus.subscribe());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = ticker.tick() => {}
                wake = next_change(&mut changes, relevant) => match wake {
                    Wake::Changed => ticker.reset(),
                    Wake::Closed => {
                        tracing::warn!("Change bus closed, continuing on the poll interval");
                        changes = None;
                        continue;
                    }
                },
            }

            match fetch().await {
                Ok(value) if settled(&value) => return Ok(value),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Poll fetch failed, retrying next tick"),
            }
        }
    }
}
