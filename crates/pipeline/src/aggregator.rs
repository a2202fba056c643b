//! Queue aggregator: a periodically refreshed summary of active jobs.
//!
//! The latest summary is published on a `tokio::sync::watch` channel so
//! readers (the queue endpoint, dashboards) never hit the store themselves.

use std::sync::Arc;
use std::time::Duration;

use embryoscore_core::queue::{summarize, QueueSummary};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::store::{JobStore, StoreError};

pub struct QueueAggregator {
    store: Arc<dyn JobStore>,
    interval: Duration,
    tx: watch::Sender<QueueSummary>,
}

impl QueueAggregator {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        let (tx, _) = watch::channel(QueueSummary::default());
        Self {
            store,
            interval,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueSummary> {
        self.tx.subscribe()
    }

    /// Last published summary.
    pub fn current(&self) -> QueueSummary {
        self.tx.borrow().clone()
    }

    /// Fetch the active jobs once and publish the new summary.
    pub async fn refresh(&self) -> Result<QueueSummary, StoreError> {
        let jobs = self.store.active_jobs().await?;
        let summary = summarize(&jobs);
        self.tx.send_replace(summary.clone());
        Ok(summary)
    }

    /// Refresh on the interval until `cancel` fires. A failed refresh keeps
    /// the previous summary.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Queue aggregator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Queue aggregator stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.refresh().await {
                        Ok(summary) => tracing::debug!(
                            pending = summary.pending,
                            processing = summary.processing,
                            "Queue summary refreshed",
                        ),
                        Err(e) => tracing::error!(error = %e, "Queue summary refresh failed"),
                    }
                }
            }
        }
    }
}
