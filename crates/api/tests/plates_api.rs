//! Plates, embryos and batch status reads.

mod common;

use axum::http::StatusCode;
use common::{body_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn test_create_plate_returns_201() {
    let app = TestApp::new().await;
    let response = app
        .post_json("/api/v1/plates", json!({"name": "Day 5 / Dish 2"}))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["name"], "Day 5 / Dish 2");
    assert!(json["data"]["id"].is_number());
}

#[tokio::test]
async fn test_blank_plate_name_returns_400() {
    let app = TestApp::new().await;
    let response = app.post_json("/api/v1/plates", json!({"name": " "})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ensure_embryo_is_idempotent() {
    let app = TestApp::new().await;
    let plate = app.plate("Plate A").await;
    let uri = format!("/api/v1/plates/{plate}/embryos");

    let first = body_json(app.post_json(&uri, json!({"position": 2})).await).await;
    let again = body_json(app.post_json(&uri, json!({"position": 2})).await).await;
    assert_eq!(first["data"]["id"], again["data"]["id"]);

    let listed = body_json(app.get(&uri).await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let response = app.post_json(&uri, json!({"position": -1})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ensure_embryo_on_unknown_plate_returns_404() {
    let app = TestApp::new().await;
    let response = app
        .post_json("/api/v1/plates/9999/embryos", json!({"position": 0}))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_returns_latest_job_per_plate() {
    let app = TestApp::new().await;
    let a = app.plate("Plate A").await;
    let b = app.plate("Plate B").await;
    let idle = app.plate("Plate C").await;
    app.job(a).await;
    let newest_a = app.job(a).await;
    let only_b = app.job(b).await;

    let json = body_json(
        app.get(&format!("/api/v1/plates/status?plate_ids={a},{b},{idle}"))
            .await,
    )
    .await;
    let mut ids: Vec<i64> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![newest_a, only_b]);
}

#[tokio::test]
async fn test_status_rejects_malformed_ids() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/plates/status?plate_ids=1,abc").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");

    let empty = body_json(app.get("/api/v1/plates/status").await).await;
    assert!(empty["data"].as_array().unwrap().is_empty());
}
