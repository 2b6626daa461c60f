//! Postgres integration tests for the storage repositories.
//!
//! Runs the production SQL against the database named by `DATABASE_URL`.
//! Each test works in a fresh schema so claims never see another test's
//! rows. Without `DATABASE_URL` the tests return early.

use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use courier_core::{
    storage::Storage, AttemptCompletion, AttemptStatus, CoreError, EventId, TenantId, Webhook,
    WebhookAttempt, WebhookId, WebhookStatus,
};
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool};
use uuid::Uuid;

struct TestDatabase {
    storage: Storage,
    admin: PgPool,
    schema: String,
}

impl TestDatabase {
    async fn connect() -> Result<Option<Self>> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping Postgres storage test");
            return Ok(None);
        };

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .context("failed to connect to DATABASE_URL")?;
        let schema = format!("courier_test_{}", Uuid::new_v4().simple());
        admin.execute(format!("CREATE SCHEMA {schema}").as_str()).await?;

        let search_path = format!("SET search_path TO {schema}");
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    conn.execute(search_path.as_str()).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await?;

        let storage = Storage::new(pool);
        storage.run_migrations().await?;
        Ok(Some(Self { storage, admin, schema }))
    }

    async fn cleanup(self) -> Result<()> {
        self.storage.pool().close().await;
        self.admin.execute(format!("DROP SCHEMA {} CASCADE", self.schema).as_str()).await?;
        Ok(())
    }

    async fn insert_webhook(&self, status: WebhookStatus) -> Result<Webhook> {
        let webhook = Webhook { status, ..webhook() };
        self.storage.webhooks.create(&webhook).await?;
        Ok(webhook)
    }

    async fn enqueue(&self, webhook: &Webhook, scheduled_at: DateTime<Utc>) -> Result<WebhookAttempt> {
        let attempt = WebhookAttempt::pending(
            webhook,
            EventId::new(),
            "order.paid",
            json!({"order": {"id": "ord_1"}}),
            base_time(),
            0,
            scheduled_at,
            base_time(),
        );
        self.storage.webhook_attempts.create(&attempt).await?;
        Ok(attempt)
    }

    async fn delivering_per_webhook(&self) -> Result<Vec<(Uuid, i64)>> {
        let rows = sqlx::query_as(
            "SELECT webhook_id, COUNT(*) FROM webhook_attempts
             WHERE status = 'delivering' GROUP BY webhook_id",
        )
        .fetch_all(&*self.storage.pool())
        .await?;
        Ok(rows)
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn webhook() -> Webhook {
    Webhook {
        id: WebhookId::new(),
        tenant_id: TenantId::new(),
        url: "https://hooks.example.com/orders".to_string(),
        events: vec!["order.paid".to_string()],
        secret: "whsec_storage_test".to_string(),
        headers: [("X-Team".to_string(), "billing".to_string())].into(),
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
        created_at: base_time(),
        updated_at: base_time(),
    }
}

fn failed_completion(at: DateTime<Utc>, next_retry_at: Option<DateTime<Utc>>) -> AttemptCompletion {
    AttemptCompletion {
        status: AttemptStatus::Failed,
        http_status: Some(503),
        response_body: Some("unavailable".to_string()),
        response_headers: Some([("retry-after".to_string(), "30".to_string())].into()),
        error_message: Some("server error: HTTP 503".to_string()),
        duration_ms: Some(42),
        completed_at: at,
        next_retry_at,
        exhausted: next_retry_at.is_none(),
    }
}

#[tokio::test]
async fn webhook_round_trips_through_postgres() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };
    let stored = db.insert_webhook(WebhookStatus::Active).await?;

    let found = db.storage.webhooks.find_by_id(stored.id).await?.expect("webhook exists");
    assert_eq!(found.tenant_id, stored.tenant_id);
    assert_eq!(found.events, stored.events);
    assert_eq!(found.headers, stored.headers);
    assert_eq!(found.filters, stored.filters);
    assert_eq!(found.timeout_ms, 5_000);

    let subscribed = db.storage.webhooks.find_subscribed(stored.tenant_id, "order.paid").await?;
    assert_eq!(subscribed.len(), 1);
    assert!(db.storage.webhooks.find_subscribed(stored.tenant_id, "order.refunded").await?.is_empty());

    db.cleanup().await
}

#[tokio::test]
async fn claim_takes_earliest_attempt_per_active_webhook() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };
    let now = base_time();
    let busy = db.insert_webhook(WebhookStatus::Active).await?;
    let quiet = db.insert_webhook(WebhookStatus::Active).await?;
    let disabled = db.insert_webhook(WebhookStatus::Disabled).await?;

    let later = db.enqueue(&busy, now - Duration::seconds(5)).await?;
    let earliest = db.enqueue(&busy, now - Duration::seconds(10)).await?;
    let only = db.enqueue(&quiet, now).await?;
    db.enqueue(&quiet, now + Duration::seconds(60)).await?;
    db.enqueue(&disabled, now - Duration::seconds(30)).await?;

    let claimed = db.storage.webhook_attempts.claim_due(now, 10).await?;
    let ids: HashSet<_> = claimed.iter().map(|a| a.id).collect();
    assert_eq!(ids, HashSet::from([earliest.id, only.id]));
    assert!(claimed.iter().all(|a| a.status == AttemptStatus::Delivering));
    assert!(claimed.iter().all(|a| a.claimed_at == Some(now)));

    assert!(
        db.storage.webhook_attempts.claim_due(now, 10).await?.is_empty(),
        "webhooks with an attempt in flight are skipped"
    );

    db.storage.webhook_attempts.release(earliest.id).await?;
    let reclaimed = db.storage.webhook_attempts.claim_due(now, 10).await?;
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, earliest.id);
    assert_ne!(reclaimed[0].id, later.id);

    db.cleanup().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_a_webhook() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };
    let now = base_time();
    let mut webhook_ids = HashSet::new();
    for _ in 0..20 {
        let webhook = db.insert_webhook(WebhookStatus::Active).await?;
        for offset in 0..3 {
            db.enqueue(&webhook, now - Duration::seconds(offset)).await?;
        }
        webhook_ids.insert(webhook.id);
    }

    let repository = Arc::clone(&db.storage.webhook_attempts);
    let claimers: Vec<_> = (0..8)
        .map(|_| {
            let repository = Arc::clone(&repository);
            tokio::spawn(async move { repository.claim_due(now, 5).await })
        })
        .collect();

    let mut claimed = Vec::new();
    for claimer in claimers {
        match claimer.await? {
            Ok(batch) => claimed.extend(batch),
            // Two claimers picked different attempts of one webhook.
            Err(CoreError::ConstraintViolation(_)) => {},
            Err(other) => return Err(other.into()),
        }
    }

    let unique: HashSet<_> = claimed.iter().map(|a| a.id).collect();
    assert_eq!(unique.len(), claimed.len(), "an attempt was claimed twice");
    let claimed_webhooks: HashSet<_> = claimed.iter().map(|a| a.webhook_id).collect();
    assert_eq!(claimed_webhooks.len(), claimed.len(), "a webhook was claimed twice");

    // Whatever the race left unclaimed is picked up by a later poll.
    claimed.extend(db.storage.webhook_attempts.claim_due(now, 100).await?);
    let claimed_webhooks: HashSet<_> = claimed.iter().map(|a| a.webhook_id).collect();
    assert_eq!(claimed_webhooks, webhook_ids);
    assert_eq!(claimed.len(), 20);

    let in_flight = db.delivering_per_webhook().await?;
    assert_eq!(in_flight.len(), 20);
    assert!(in_flight.iter().all(|(_, count)| *count == 1));

    db.cleanup().await
}

#[tokio::test]
async fn completion_and_successor_commit_together() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };
    let now = base_time();
    let webhook = db.insert_webhook(WebhookStatus::Active).await?;
    let first = db.enqueue(&webhook, now).await?;
    let attempts = &db.storage.webhook_attempts;

    let unclaimed = attempts.complete(first.id, &failed_completion(now, None), None).await;
    assert!(matches!(unclaimed, Err(ref e) if e.is_not_found()));

    attempts.claim_due(now, 1).await?;
    let retry_at = now + Duration::seconds(10);
    let second = first.successor(&webhook.url, retry_at, now);
    attempts.complete(first.id, &failed_completion(now, Some(retry_at)), Some(&second)).await?;

    let chain = attempts.find_chain(webhook.id, first.event_id).await?;
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].status, AttemptStatus::Failed);
    assert_eq!(chain[0].http_status, Some(503));
    assert_eq!(chain[0].next_retry_at, Some(retry_at));
    assert!(!chain[0].exhausted);
    assert_eq!(chain[1].id, second.id);
    assert_eq!(chain[1].attempt_number, 1);
    assert_eq!(chain[1].status, AttemptStatus::Pending);
    assert_eq!(chain[1].scheduled_at, retry_at);

    // A successor that collides with an existing attempt rolls back the
    // completion as well.
    attempts.claim_due(retry_at, 1).await?;
    let duplicate = first.successor(&webhook.url, retry_at + Duration::seconds(20), retry_at);
    let result = attempts
        .complete(second.id, &failed_completion(retry_at, Some(retry_at)), Some(&duplicate))
        .await;
    assert!(matches!(result, Err(CoreError::ConstraintViolation(_))));

    let unchanged = attempts.find_by_id(second.id).await?.expect("attempt exists");
    assert_eq!(unchanged.status, AttemptStatus::Delivering);
    assert!(unchanged.completed_at.is_none());
    assert_eq!(attempts.find_chain(webhook.id, first.event_id).await?.len(), 2);

    db.cleanup().await
}

#[tokio::test]
async fn outcome_counters_trip_the_threshold_once() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };
    let now = base_time();
    let webhook = db.insert_webhook(WebhookStatus::Active).await?;
    let webhooks = &db.storage.webhooks;

    let first = webhooks.record_outcome(webhook.id, false, now, 3).await?;
    let second = webhooks.record_outcome(webhook.id, false, now, 3).await?;
    assert_eq!((first.status, first.consecutive_failures, first.tripped), (WebhookStatus::Active, 1, false));
    assert_eq!((second.status, second.consecutive_failures, second.tripped), (WebhookStatus::Active, 2, false));

    let third = webhooks.record_outcome(webhook.id, false, now, 3).await?;
    assert_eq!(third.status, WebhookStatus::Failed);
    assert!(third.tripped);

    let fourth = webhooks.record_outcome(webhook.id, false, now, 3).await?;
    assert_eq!(fourth.status, WebhookStatus::Failed);
    assert_eq!(fourth.consecutive_failures, 4);
    assert!(!fourth.tripped, "only the transition reports a trip");

    let stored = webhooks.find_by_id(webhook.id).await?.expect("webhook exists");
    assert_eq!(stored.total_attempts, 4);
    assert_eq!(stored.failed_attempts, 4);
    assert_eq!(stored.last_failure_at, Some(now));

    let enabled = webhooks.set_status(webhook.id, WebhookStatus::Active, now).await?;
    assert_eq!(enabled.consecutive_failures, 0);

    let success = webhooks.record_outcome(webhook.id, true, now, 3).await?;
    assert_eq!((success.status, success.consecutive_failures), (WebhookStatus::Active, 0));

    db.cleanup().await
}

#[tokio::test]
async fn zero_threshold_never_trips() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };
    let webhook = db.insert_webhook(WebhookStatus::Active).await?;

    for _ in 0..10 {
        let health = db.storage.webhooks.record_outcome(webhook.id, false, base_time(), 0).await?;
        assert_eq!(health.status, WebhookStatus::Active);
        assert!(!health.tripped);
    }

    db.cleanup().await
}

#[tokio::test]
async fn stale_claims_return_to_pending() -> Result<()> {
    let Some(db) = TestDatabase::connect().await? else { return Ok(()) };
    let now = base_time();
    let webhook = db.insert_webhook(WebhookStatus::Active).await?;
    let attempt = db.enqueue(&webhook, now).await?;
    let attempts = &db.storage.webhook_attempts;

    attempts.claim_due(now, 1).await?;
    assert_eq!(attempts.count_pending().await?, 0);
    assert_eq!(attempts.release_stale(now).await?, 0);
    assert_eq!(attempts.release_stale(now + Duration::seconds(1)).await?, 1);

    let released = attempts.find_by_id(attempt.id).await?.expect("attempt exists");
    assert_eq!(released.status, AttemptStatus::Pending);
    assert!(released.claimed_at.is_none());
    assert_eq!(attempts.count_pending().await?, 1);

    db.cleanup().await
}
