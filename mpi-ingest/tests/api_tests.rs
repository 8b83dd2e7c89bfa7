//! Admin HTTP API integration tests

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use helpers::*;
use http_body_util::BodyExt;
use mpi_common::api::{calculate_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use mpi_ingest::{build_router, AppState};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

/// Test helper: router over an in-memory database and scripted source
async fn create_test_app(source: Arc<FakeLogSource>, shared_secret: i64) -> (Router, SqlitePool) {
    let pool = test_pool().await;
    let config = test_config();
    let services = build_services_with(&pool, source, &config);

    let state = AppState::new(
        pool.clone(),
        shared_secret,
        services,
        config.ingest.clone(),
        CancellationToken::new(),
    );

    (build_router(state), pool)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _pool) = create_test_app(Arc::new(FakeLogSource::default()), 0).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "mpi-ingest");
    assert!(body["last_error"].is_null());
}

#[tokio::test]
async fn test_replay_returns_summary() {
    let mut logs = payments_per_block(0, 9, song(0x51));
    logs[3] = unknown_type_log(tx_hash(3), 0, 3, song(0x51));
    let (app, pool) = create_test_app(Arc::new(FakeLogSource::new(logs)), 0).await;

    let response = app
        .oneshot(post_json("/admin/replay", json!({ "fromBlock": 0, "toBlock": 9 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "scanned": 10, "successful": 9 }));
    assert_eq!(play_record_count(&pool).await, 9);
}

#[tokio::test]
async fn test_replay_rejects_invalid_ranges() {
    let source = Arc::new(FakeLogSource::new(payments_per_block(0, 9, song(0x51))));
    let (app, _pool) = create_test_app(source.clone(), 0).await;

    let bodies = [
        json!({ "fromBlock": 100, "toBlock": 50 }),
        json!({ "fromBlock": -1, "toBlock": 5 }),
        json!({ "fromBlock": "zero", "toBlock": 5 }),
        json!({ "fromBlock": 1.5, "toBlock": 5 }),
        json!({ "toBlock": 5 }),
    ];

    for body in bodies {
        let response = app
            .clone()
            .oneshot(post_json("/admin/replay", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {}", body);
        assert_eq!(body_json(response).await["error"]["code"], "invalid_block_range");
    }

    assert_eq!(source.get_logs_calls(), 0);
}

#[tokio::test]
async fn test_replay_source_failure_is_500() {
    let source = Arc::new(FakeLogSource::new(payments_per_block(0, 9, song(0x51))));
    source.set_unreachable(true);
    let (app, _pool) = create_test_app(source, 0).await;

    let response = app
        .oneshot(post_json("/admin/replay", json!({ "fromBlock": 0, "toBlock": 9 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "replay_failed");
    assert!(body["error"]["message"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_poison_list_and_retry() {
    let s1 = song(0x51);
    let tx = tx_hash(4);
    let source = Arc::new(FakeLogSource::new(vec![unknown_type_log(tx, 1, 4, s1)]));
    let (app, pool) = create_test_app(source.clone(), 0).await;

    let response = app
        .clone()
        .oneshot(post_json("/admin/replay", json!({ "fromBlock": 0, "toBlock": 9 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/admin/poison?limit=5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let list = body_json(response).await;
    let records = list.as_array().unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["logIndex"], 1);
    assert_eq!(record["blockNumber"], 4);
    assert_eq!(record["attempts"], 1);
    assert!(record["transactionHash"].as_str().unwrap().starts_with("0x"));
    assert!(record["songIdentifier"].is_string());
    assert!(record["reason"].as_str().unwrap().contains("unknown payment type"));
    assert!(record["createdAt"].is_string());

    // Still malformed: stays quarantined
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/poison/retry")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "retried": 0 }));

    source.upsert_log(payment_log(tx, 1, 4, s1, ONE_TOKEN));
    let response = app
        .clone()
        .oneshot(post_json("/admin/poison/retry", json!({ "limit": 5 })))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({ "retried": 1 }));

    assert_eq!(poison_count(&pool).await, 0);
    assert_eq!(play_record_count(&pool).await, 1);
}

#[tokio::test]
async fn test_poison_rejects_bad_limits() {
    let (app, _pool) = create_test_app(Arc::new(FakeLogSource::default()), 0).await;

    let response = app.clone().oneshot(get("/admin/poison?limit=abc")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_request");

    let response = app
        .clone()
        .oneshot(post_json("/admin/poison/retry", json!({ "limit": 0 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_relink_endpoint() {
    let s1 = song(0x51);
    let source = Arc::new(FakeLogSource::new(payments_per_block(0, 2, s1)));
    let (app, pool) = create_test_app(source, 0).await;

    app.clone()
        .oneshot(post_json("/admin/replay", json!({ "fromBlock": 0, "toBlock": 2 })))
        .await
        .unwrap();
    insert_song(&pool, "s1", s1).await;

    let response = app
        .oneshot(post_json("/admin/plays/relink", json!({ "limit": 10 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "linked": 3 }));
    assert_eq!(aggregate(&pool, "s1").await.0, 3);
}

#[tokio::test]
async fn test_admin_routes_require_signature() {
    const SECRET: i64 = 8_675_309;
    let source = Arc::new(FakeLogSource::new(payments_per_block(0, 4, song(0x51))));
    let (app, _pool) = create_test_app(source, SECRET).await;

    // Unsigned
    let response = app.clone().oneshot(get("/admin/poison")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["code"], "unauthorized");

    // Health stays public
    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json!({ "fromBlock": 0, "toBlock": 4 }).to_string();
    let timestamp = chrono::Utc::now().timestamp_millis();
    let signature = calculate_signature("POST", "/admin/replay", timestamp, body.as_bytes(), SECRET);

    let signed = |signature: &str| {
        Request::builder()
            .method("POST")
            .uri("/admin/replay")
            .header("content-type", "application/json")
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let response = app.clone().oneshot(signed("00ff")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.clone().oneshot(signed(&signature)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "scanned": 5, "successful": 5 }));

    // Stale timestamp
    let stale = timestamp - 60_000;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/poison")
                .header(TIMESTAMP_HEADER, stale.to_string())
                .header(
                    SIGNATURE_HEADER,
                    calculate_signature("GET", "/admin/poison", stale, b"", SECRET),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
