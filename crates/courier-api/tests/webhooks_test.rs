//! Webhook management endpoints.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_api::{create_router, AppState};
use courier_testing::{payloads, MockResponse, TenantId, TestEnv, WebhookStatus};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn router(env: &TestEnv) -> Router {
    create_router(AppState {
        registry: env.shared_registry(),
        dispatcher: env.shared_dispatcher(),
        storage: env.storage(),
        clock: env.shared_clock(),
        request_timeout: Duration::from_secs(5),
    })
}

async fn send(env: &TestEnv, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router(env).oneshot(request).await.expect("failed to make request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn register_returns_secret_once() {
    let env = TestEnv::new().await.unwrap();
    let tenant = Uuid::new_v4();

    let (status, created) = send(
        &env,
        "POST",
        &format!("/tenants/{tenant}/webhooks"),
        Some(json!({
            "url": env.endpoint_url("/hooks"),
            "events": ["order.paid", "contact.created"],
            "max_retries": 5,
            "headers": {"X-Team": "billing"},
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(created["secret"].as_str().unwrap().starts_with("whsec_"));
    assert_eq!(created["events"], json!(["contact.created", "order.paid"]));
    assert_eq!(created["max_retries"], 5);
    assert_eq!(created["status"], "active");

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = send(&env, "GET", &format!("/webhooks/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(fetched.get("secret").is_none());
    assert_eq!(fetched["headers"]["X-Team"], "billing");
}

#[tokio::test]
async fn invalid_registration_is_rejected_with_error_body() {
    let env = TestEnv::new().await.unwrap();
    let tenant = Uuid::new_v4();

    let (status, body) = send(
        &env,
        "POST",
        &format!("/tenants/{tenant}/webhooks"),
        Some(json!({"url": env.endpoint_url("/hooks"), "events": ["order.teleported"]})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("order.teleported"));
}

#[tokio::test]
async fn list_is_scoped_to_tenant() {
    let env = TestEnv::new().await.unwrap();
    let tenant = TenantId::new();
    let other = TenantId::new();
    env.register_webhook(tenant, "/a", &["order.paid"]).await.unwrap();
    env.register_webhook(tenant, "/b", &["order.paid"]).await.unwrap();
    env.register_webhook(other, "/c", &["order.paid"]).await.unwrap();

    let (status, body) = send(&env, "GET", &format!("/tenants/{tenant}/webhooks"), None).await;

    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|w| w["tenant_id"] == tenant.to_string()));
}

#[tokio::test]
async fn unknown_webhook_is_not_found() {
    let env = TestEnv::new().await.unwrap();

    let (status, body) = send(&env, "GET", &format!("/webhooks/{}", Uuid::new_v4()), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn disable_and_enable_round_trip_status() {
    let env = TestEnv::new().await.unwrap();
    let webhook = env.register_webhook(TenantId::new(), "/toggle", &["order.paid"]).await.unwrap();

    let (status, body) = send(&env, "POST", &format!("/webhooks/{}/disable", webhook.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disabled");
    assert_eq!(env.webhook(webhook.id).await.unwrap().status, WebhookStatus::Disabled);

    let (status, body) = send(&env, "POST", &format!("/webhooks/{}/enable", webhook.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert_eq!(body["consecutive_failures"], 0);
}

#[tokio::test]
async fn attempt_history_lists_newest_first() {
    let env = TestEnv::new().await.unwrap();
    let tenant = TenantId::new();
    env.mock_endpoint_sequence("/history", vec![MockResponse::failure(503), MockResponse::ok()])
        .await;
    let webhook = env.register_webhook(tenant, "/history", &["order.paid"]).await.unwrap();
    env.dispatch(tenant, "order.paid", payloads::order_paid("o", 1)).await.unwrap();
    env.run_to_completion().await.unwrap();

    let (status, body) =
        send(&env, "GET", &format!("/webhooks/{}/attempts?limit=10", webhook.id), None).await;

    assert_eq!(status, StatusCode::OK);
    let attempts = body.as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["attempt_number"], 1);
    assert_eq!(attempts[0]["status"], "success");
    assert_eq!(attempts[1]["http_status"], 503);
    assert!(attempts[1]["next_retry_at"].is_string());

    let (_, limited) =
        send(&env, "GET", &format!("/webhooks/{}/attempts?limit=1", webhook.id), None).await;
    assert_eq!(limited.as_array().unwrap().len(), 1);
}
