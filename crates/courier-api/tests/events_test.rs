//! Event trigger endpoint, through to delivery.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_api::{create_router, AppState};
use courier_testing::{MockResponse, TenantId, TestEnv};
use serde_json::{json, Value};
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

async fn trigger(env: &TestEnv, tenant: TenantId, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/tenants/{tenant}/events"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = router(env).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn triggered_event_is_accepted_and_delivered() {
    let env = TestEnv::new().await.unwrap();
    let tenant = TenantId::new();
    env.mock_endpoint("/orders", MockResponse::ok()).await;
    let webhook = env.register_webhook(tenant, "/orders", &["order.paid"]).await.unwrap();

    let (status, report) = trigger(
        &env,
        tenant,
        json!({"event": "order.paid", "payload": {"order_id": "ord_1", "amount": 4200}}),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(report["event"], "order.paid");
    assert_eq!(report["webhook_ids"], json!([webhook.id.to_string()]));

    assert_eq!(env.run_until_idle().await.unwrap(), 1);
    let received = env.received_on("/orders").await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].envelope["id"], report["event_id"]);
    assert_eq!(received[0].envelope["data"]["order_id"], "ord_1");
}

#[tokio::test]
async fn unknown_event_is_rejected() {
    let env = TestEnv::new().await.unwrap();

    let (status, body) =
        trigger(&env, TenantId::new(), json!({"event": "order.teleported", "payload": {}})).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(env.storage().attempts().await.is_empty());
}

#[tokio::test]
async fn event_without_subscribers_creates_nothing() {
    let env = TestEnv::new().await.unwrap();

    let (status, report) =
        trigger(&env, TenantId::new(), json!({"event": "contact.created", "payload": {}})).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(report["webhook_ids"], json!([]));
}
