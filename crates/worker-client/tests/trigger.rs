//! Trigger calls against a local stand-in worker.

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use embryoscore_worker_client::{WorkerApi, WorkerApiError, WorkerClientConfig, WorkerTrigger};
use serde_json::{json, Value};

async fn spawn_worker(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/analyze")
}

fn config(url: String, token: Option<&str>) -> WorkerClientConfig {
    WorkerClientConfig {
        url,
        token: token.map(str::to_string),
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn test_trigger_sends_job_id_and_token() {
    let router = Router::new().route(
        "/analyze",
        post(|headers: HeaderMap, Json(body): Json<Value>| async move {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(json!({ "success": auth == "Bearer secret" && body["queue_id"] == 42 }))
        }),
    );
    let url = spawn_worker(router).await;

    let api = WorkerApi::new(&config(url, Some("secret"))).unwrap();
    let response = WorkerTrigger::trigger(&api, 42).await.unwrap();
    assert!(response.success);
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let router = Router::new().route(
        "/analyze",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
    );
    let url = spawn_worker(router).await;

    let api = WorkerApi::new(&config(url, None)).unwrap();
    match api.trigger(1).await {
        Err(WorkerApiError::ApiError { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "busy");
        }
        other => panic!("expected ApiError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_worker_is_a_request_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = WorkerApi::new(&config(format!("http://{addr}/analyze"), None)).unwrap();
    assert!(matches!(api.trigger(1).await, Err(WorkerApiError::Request(_))));
}
