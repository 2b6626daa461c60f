//! Domain model behavior: JSON shape, attempt chains, completion records.

use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use courier_core::{
    AttemptCompletion, AttemptStatus, EventId, TenantId, Webhook, WebhookAttempt, WebhookId,
    WebhookStatus,
};
use serde_json::json;

fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn webhook() -> Webhook {
    Webhook {
        id: WebhookId::new(),
        tenant_id: TenantId::new(),
        url: "https://hooks.example.com/orders".to_string(),
        events: vec!["order.paid".to_string(), "order.refunded".to_string()],
        secret: "whsec_model_test".to_string(),
        headers: HashMap::from([("X-Team".to_string(), "billing".to_string())]),
        filters: json!({"currency": "eur"}),
        max_retries: 3,
        timeout_ms: 5_000,
        verify_ssl: true,
        total_attempts: 0,
        successful_attempts: 0,
        failed_attempts: 0,
        consecutive_failures: 0,
        status: WebhookStatus::Active,
        last_success_at: None,
        last_failure_at: None,
        created_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

#[test]
fn statuses_serialize_lowercase() {
    assert_eq!(serde_json::to_value(WebhookStatus::Failed).unwrap(), json!("failed"));
    assert_eq!(serde_json::to_value(AttemptStatus::Delivering).unwrap(), json!("delivering"));
    assert_eq!(
        serde_json::from_value::<WebhookStatus>(json!("disabled")).unwrap(),
        WebhookStatus::Disabled
    );
}

#[test]
fn ids_serialize_as_bare_uuids() {
    let id = WebhookId::new();

    let value = serde_json::to_value(id).unwrap();

    assert_eq!(value, json!(id.0.to_string()));
}

#[test]
fn filters_gate_payloads() {
    let webhook = webhook();

    assert!(webhook.matches_filters(&json!({"currency": "eur", "amount": 10})));
    assert!(!webhook.matches_filters(&json!({"currency": "usd"})));
    assert!(!webhook.matches_filters(&json!({"amount": 10})));
}

#[test]
fn timeout_converts_from_millis() {
    assert_eq!(webhook().timeout(), std::time::Duration::from_secs(5));
}

#[test]
fn pending_attempt_snapshots_the_webhook() {
    let webhook = webhook();
    let event_id = EventId::new();
    let now = fixed_time();

    let attempt = WebhookAttempt::pending(
        &webhook,
        event_id,
        "order.paid",
        json!({"order_id": "ord_1"}),
        now,
        0,
        now,
        now,
    );

    assert_eq!(attempt.webhook_id, webhook.id);
    assert_eq!(attempt.tenant_id, webhook.tenant_id);
    assert_eq!(attempt.url, webhook.url);
    assert_eq!(attempt.status, AttemptStatus::Pending);
    assert_eq!(attempt.attempt_number, 0);
    assert!(attempt.completed_at.is_none());
}

#[test]
fn chain_keeps_occurrence_across_successors() {
    let webhook = webhook();
    let now = fixed_time();
    let first = WebhookAttempt::pending(
        &webhook,
        EventId::new(),
        "order.paid",
        json!({"order_id": "ord_1"}),
        now,
        0,
        now,
        now,
    );

    let second = first.successor(&webhook.url, now + Duration::seconds(10), now);
    let third = second.successor("https://hooks.example.com/moved", now + Duration::seconds(30), now);

    assert_eq!(third.event_id, first.event_id);
    assert_eq!(third.occurred_at, first.occurred_at);
    assert_eq!(third.payload, first.payload);
    assert_eq!(third.attempt_number, 2);
    assert_eq!(third.url, "https://hooks.example.com/moved");
    assert_ne!(third.id, second.id);
}

#[test]
fn completion_marks_failed_attempt_with_retry_time() {
    let webhook = webhook();
    let now = fixed_time();
    let mut attempt =
        WebhookAttempt::pending(&webhook, EventId::new(), "order.paid", json!({}), now, 0, now, now);
    attempt.status = AttemptStatus::Delivering;

    attempt.apply(&AttemptCompletion {
        status: AttemptStatus::Failed,
        http_status: Some(503),
        response_body: Some("busy".to_string()),
        response_headers: None,
        error_message: Some("server error: HTTP 503".to_string()),
        duration_ms: Some(42),
        completed_at: now + Duration::seconds(1),
        next_retry_at: Some(now + Duration::seconds(11)),
        exhausted: false,
    });

    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(attempt.status.is_terminal());
    assert_eq!(attempt.http_status, Some(503));
    assert_eq!(attempt.completed_at, Some(now + Duration::seconds(1)));
    assert_eq!(attempt.next_retry_at, Some(now + Duration::seconds(11)));
    assert!(!attempt.exhausted);
}

#[test]
fn webhook_round_trips_through_json() {
    let original = webhook();

    let decoded: Webhook = serde_json::from_value(serde_json::to_value(&original).unwrap()).unwrap();

    assert_eq!(decoded.id, original.id);
    assert_eq!(decoded.events, original.events);
    assert_eq!(decoded.filters, original.filters);
    assert_eq!(decoded.status, original.status);
}
