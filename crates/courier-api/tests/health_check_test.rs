//! Health, readiness and liveness endpoint tests.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_api::{create_router, AppState};
use courier_testing::TestEnv;
use serde_json::Value;
use tower::ServiceExt;

fn router(env: &TestEnv) -> Router {
    create_router(AppState {
        registry: env.shared_registry(),
        dispatcher: env.shared_dispatcher(),
        storage: env.storage(),
        clock: env.shared_clock(),
        request_timeout: Duration::from_secs(5),
    })
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.expect("failed to make request");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    (status, serde_json::from_slice(&body).expect("response should be valid JSON"))
}

#[tokio::test]
async fn health_check_returns_success_when_healthy() {
    let env = TestEnv::new().await.expect("failed to create test environment");

    let (status, body) = get_json(router(&env), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"]["status"], "up");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn readiness_reports_pending_backlog() {
    let env = TestEnv::new().await.expect("failed to create test environment");
    let tenant = courier_testing::TenantId::new();
    env.register_webhook(tenant, "/ready", &["order.paid"]).await.unwrap();
    env.dispatch(tenant, "order.paid", courier_testing::payloads::order_paid("o", 1))
        .await
        .unwrap();

    let (status, body) = get_json(router(&env), "/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["pending_attempts"], 1);
}

#[tokio::test]
async fn liveness_uses_environment_clock() {
    let env = TestEnv::new().await.expect("failed to create test environment");
    env.advance_time(Duration::from_secs(3600));

    let (status, body) = get_json(router(&env), "/live").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
    let timestamp: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(body["timestamp"].clone()).unwrap();
    assert_eq!(timestamp, env.now());
}

#[tokio::test]
async fn responses_carry_request_id() {
    let env = TestEnv::new().await.expect("failed to create test environment");

    let request = Request::builder()
        .uri("/live")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = router(&env).oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let request = Request::builder().uri("/live").body(Body::empty()).unwrap();
    let response = router(&env).oneshot(request).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
