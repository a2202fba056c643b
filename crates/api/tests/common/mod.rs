//! Shared fixtures for HTTP-level tests.
//!
//! The app is built over the in-memory job store and a recording worker
//! trigger, with the same middleware stack as production.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use embryoscore_core::detection::Detector;
use embryoscore_core::frame::StillImageFrameSource;
use embryoscore_core::types::DbId;
use embryoscore_events::EventBus;
use embryoscore_pipeline::{MemoryJobStore, PollConfig};
use embryoscore_worker_client::{TriggerResponse, WorkerApiError, WorkerTrigger};
use http_body_util::BodyExt;
use tower::ServiceExt;

use embryoscore_api::config::{LogFormat, ServerConfig};
use embryoscore_api::router::build_app_router;
use embryoscore_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        log_format: LogFormat::Pretty,
        poll: PollConfig {
            job_interval: Duration::from_millis(50),
            queue_interval: Duration::from_secs(10),
        },
    }
}

/// Records trigger calls; fails them while `failing` is set.
#[derive(Default)]
pub struct MockTrigger {
    pub calls: Mutex<Vec<DbId>>,
    pub failing: AtomicBool,
}

impl MockTrigger {
    pub fn calls(&self) -> Vec<DbId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerTrigger for MockTrigger {
    async fn trigger(&self, job_id: DbId) -> Result<TriggerResponse, WorkerApiError> {
        self.calls.lock().unwrap().push(job_id);
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkerApiError::ApiError {
                status: 503,
                body: "worker offline".to_string(),
            });
        }
        Ok(TriggerResponse {
            success: true,
            error: None,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryJobStore>,
    pub trigger: Arc<MockTrigger>,
    pub bus: Arc<EventBus>,
}

impl TestApp {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let trigger = Arc::new(MockTrigger::default());
        let bus = Arc::new(EventBus::default());
        let config = test_config();
        let state = AppState::new(
            store.clone(),
            trigger.clone(),
            Arc::new(StillImageFrameSource),
            Detector::shared().await.unwrap(),
            Some(Arc::clone(&bus)),
            config.clone(),
        );
        let router = build_app_router(state.clone(), &config);
        Self {
            router,
            state,
            store,
            trigger,
            bus,
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Method::GET, uri, Body::empty(), false).await
    }

    pub async fn post(&self, uri: &str) -> Response<Body> {
        self.send(Method::POST, uri, Body::empty(), false).await
    }

    pub async fn post_json(&self, uri: &str, json: serde_json::Value) -> Response<Body> {
        self.send(Method::POST, uri, Body::from(json.to_string()), true)
            .await
    }

    async fn send(&self, method: Method, uri: &str, body: Body, json: bool) -> Response<Body> {
        let mut request = Request::builder().method(method).uri(uri);
        if json {
            request = request.header("content-type", "application/json");
        }
        self.router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Create a plate and return its id.
    pub async fn plate(&self, name: &str) -> i64 {
        let response = self
            .post_json("/api/v1/plates", serde_json::json!({ "name": name }))
            .await;
        body_json(response).await["data"]["id"].as_i64().unwrap()
    }

    /// Create a pending job (without dispatch) and return its id.
    pub async fn job(&self, plate_id: i64) -> i64 {
        let response = self
            .post_json(
                "/api/v1/jobs",
                serde_json::json!({
                    "plate_id": plate_id,
                    "media_ref": "plates/day5.mp4",
                    "expected_count": 4,
                }),
            )
            .await;
        body_json(response).await["data"]["job"]["id"].as_i64().unwrap()
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
