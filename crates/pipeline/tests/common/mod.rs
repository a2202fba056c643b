//! Shared fixtures for pipeline tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use embryoscore_core::analysis_job::AnalysisJob;
use embryoscore_core::scoring::{NewEmbryoScore, ScoreInput, ScoreWeights};
use embryoscore_core::types::DbId;
use embryoscore_db::models::analysis_job::CreateAnalysisJob;
use embryoscore_db::models::embryo::CreatePlate;
use embryoscore_pipeline::{Dispatcher, JobController, JobStore, MemoryJobStore};
use embryoscore_worker_client::{TriggerResponse, WorkerApiError, WorkerTrigger};
use tokio::sync::Notify;

/// Records trigger calls; fails them while `failing` is set. With a
/// `hold`, each call waits for a notification before answering.
#[derive(Default)]
pub struct MockTrigger {
    pub calls: Mutex<Vec<DbId>>,
    pub failing: AtomicBool,
    pub hold: Option<Arc<Notify>>,
}

impl MockTrigger {
    pub fn failing() -> Self {
        let mock = Self::default();
        mock.failing.store(true, Ordering::SeqCst);
        mock
    }

    pub fn held(release: Arc<Notify>) -> Self {
        Self {
            hold: Some(release),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<DbId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerTrigger for MockTrigger {
    async fn trigger(&self, job_id: DbId) -> Result<TriggerResponse, WorkerApiError> {
        self.calls.lock().unwrap().push(job_id);
        if let Some(release) = &self.hold {
            release.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkerApiError::ApiError {
                status: 502,
                body: "connection refused".to_string(),
            });
        }
        Ok(TriggerResponse {
            success: true,
            error: None,
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub trigger: Arc<MockTrigger>,
    pub controller: JobController,
}

impl Harness {
    pub fn with_trigger(trigger: MockTrigger) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let trigger = Arc::new(trigger);
        let dispatcher = Dispatcher::new(store.clone(), trigger.clone());
        let controller = JobController::new(store.clone(), dispatcher);
        Self {
            store,
            trigger,
            controller,
        }
    }

    pub fn new() -> Self {
        Self::with_trigger(MockTrigger::default())
    }

    pub async fn plate(&self) -> DbId {
        self.store
            .create_plate(&CreatePlate {
                name: "plate".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    pub async fn job(&self, plate_id: DbId) -> AnalysisJob {
        self.store
            .create(&CreateAnalysisJob {
                plate_id,
                media_ref: "plate.mp4".to_string(),
                expected_count: Some(3),
            })
            .await
            .unwrap()
    }

    pub async fn processing_job(&self, plate_id: DbId) -> AnalysisJob {
        let job = self.job(plate_id).await;
        self.store.claim(job.id).await.unwrap()
    }

    /// Run a whole attempt that scores `embryo_ids`.
    pub async fn completed_job(&self, plate_id: DbId, embryo_ids: &[DbId]) -> AnalysisJob {
        let job = self.processing_job(plate_id).await;
        let scores: Vec<NewEmbryoScore> = embryo_ids.iter().map(|&id| score(id)).collect();
        self.store.complete(job.id, job.retry_count, &scores).await.unwrap()
    }
}

pub fn score(embryo_id: DbId) -> NewEmbryoScore {
    NewEmbryoScore::from_input(
        &ScoreInput {
            embryo_id,
            morph_score: 73.0,
            kinetic_score: 41.0,
            confidence: Some(0.9),
            reasoning: None,
            model_used: None,
        },
        ScoreWeights::default(),
    )
}
