//! Repository for webhook subscription rows.
//!
//! Besides plain CRUD this owns the health counter update: one statement
//! bumps the counters, resets or extends the failure streak, and applies the
//! consecutive failure threshold, so concurrent workers cannot interleave
//! partial updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{types::Json, Executor, PgPool, Postgres, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{TenantId, Webhook, WebhookHealth, WebhookId, WebhookStatus},
};

/// Repository for webhook database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new webhook.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or constraints are violated.
    pub async fn create(&self, webhook: &Webhook) -> Result<WebhookId> {
        self.create_impl(&*self.pool, webhook).await
    }

    /// Inserts a webhook within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        webhook: &Webhook,
    ) -> Result<WebhookId> {
        self.create_impl(&mut **tx, webhook).await
    }

    async fn create_impl<'e, E>(&self, executor: E, webhook: &Webhook) -> Result<WebhookId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO webhooks (
                id, tenant_id, url, events, secret, headers, filters,
                max_retries, timeout_ms, verify_ssl,
                total_attempts, successful_attempts, failed_attempts, consecutive_failures,
                status, last_success_at, last_failure_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            RETURNING id
            ",
        )
        .bind(webhook.id)
        .bind(webhook.tenant_id)
        .bind(&webhook.url)
        .bind(&webhook.events)
        .bind(&webhook.secret)
        .bind(Json(&webhook.headers))
        .bind(&webhook.filters)
        .bind(to_i32(webhook.max_retries, "max_retries")?)
        .bind(to_i64(webhook.timeout_ms, "timeout_ms")?)
        .bind(webhook.verify_ssl)
        .bind(to_i64(webhook.total_attempts, "total_attempts")?)
        .bind(to_i64(webhook.successful_attempts, "successful_attempts")?)
        .bind(to_i64(webhook.failed_attempts, "failed_attempts")?)
        .bind(to_i32(webhook.consecutive_failures, "consecutive_failures")?)
        .bind(webhook.status)
        .bind(webhook.last_success_at)
        .bind(webhook.last_failure_at)
        .bind(webhook.created_at)
        .bind(webhook.updated_at)
        .fetch_one(executor)
        .await?;

        Ok(WebhookId(id))
    }

    /// Finds a webhook by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, webhook_id: WebhookId) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>(
            r"
            SELECT id, tenant_id, url, events, secret, headers, filters,
                   max_retries, timeout_ms, verify_ssl,
                   total_attempts, successful_attempts, failed_attempts, consecutive_failures,
                   status, last_success_at, last_failure_at, created_at, updated_at
            FROM webhooks
            WHERE id = $1
            ",
        )
        .bind(webhook_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(webhook)
    }

    /// Lists a tenant's webhooks, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_tenant(&self, tenant_id: TenantId) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>(
            r"
            SELECT id, tenant_id, url, events, secret, headers, filters,
                   max_retries, timeout_ms, verify_ssl,
                   total_attempts, successful_attempts, failed_attempts, consecutive_failures,
                   status, last_success_at, last_failure_at, created_at, updated_at
            FROM webhooks
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(tenant_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(webhooks)
    }

    /// Active webhooks of a tenant subscribed to `event`.
    ///
    /// Filters are evaluated by the caller against the payload.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_subscribed(&self, tenant_id: TenantId, event: &str) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>(
            r"
            SELECT id, tenant_id, url, events, secret, headers, filters,
                   max_retries, timeout_ms, verify_ssl,
                   total_attempts, successful_attempts, failed_attempts, consecutive_failures,
                   status, last_success_at, last_failure_at, created_at, updated_at
            FROM webhooks
            WHERE tenant_id = $1
              AND status = 'active'
              AND $2 = ANY(events)
            ORDER BY created_at
            ",
        )
        .bind(tenant_id)
        .bind(event)
        .fetch_all(&*self.pool)
        .await?;

        Ok(webhooks)
    }

    /// Sets the status and returns the updated webhook.
    ///
    /// Moving to `active` clears the failure streak so a re-enabled webhook
    /// does not trip again on its next failure.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the webhook does not exist.
    pub async fn set_status(
        &self,
        webhook_id: WebhookId,
        status: WebhookStatus,
        now: DateTime<Utc>,
    ) -> Result<Webhook> {
        let webhook = sqlx::query_as::<_, Webhook>(
            r"
            UPDATE webhooks
            SET status = $2,
                consecutive_failures = CASE WHEN $2 = 'active' THEN 0 ELSE consecutive_failures END,
                updated_at = $3
            WHERE id = $1
            RETURNING id, tenant_id, url, events, secret, headers, filters,
                      max_retries, timeout_ms, verify_ssl,
                      total_attempts, successful_attempts, failed_attempts, consecutive_failures,
                      status, last_success_at, last_failure_at, created_at, updated_at
            ",
        )
        .bind(webhook_id)
        .bind(status)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        webhook.ok_or_else(|| CoreError::not_found("webhook", webhook_id))
    }

    /// Records one attempt outcome against the webhook's counters.
    ///
    /// A `failure_threshold` of zero never trips the webhook.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the webhook does not exist.
    pub async fn record_outcome(
        &self,
        webhook_id: WebhookId,
        succeeded: bool,
        completed_at: DateTime<Utc>,
        failure_threshold: u32,
    ) -> Result<WebhookHealth> {
        let row: Option<(WebhookStatus, i32, WebhookStatus)> = sqlx::query_as(
            r"
            WITH previous AS (
                SELECT id, status FROM webhooks WHERE id = $1 FOR UPDATE
            )
            UPDATE webhooks w
            SET total_attempts = w.total_attempts + 1,
                successful_attempts = w.successful_attempts + CASE WHEN $2 THEN 1 ELSE 0 END,
                failed_attempts = w.failed_attempts + CASE WHEN $2 THEN 0 ELSE 1 END,
                consecutive_failures = CASE WHEN $2 THEN 0 ELSE w.consecutive_failures + 1 END,
                last_success_at = CASE WHEN $2 THEN $3 ELSE w.last_success_at END,
                last_failure_at = CASE WHEN $2 THEN w.last_failure_at ELSE $3 END,
                status = CASE
                    WHEN NOT $2 AND $4 > 0 AND w.status = 'active'
                         AND w.consecutive_failures + 1 >= $4 THEN 'failed'
                    ELSE w.status
                END,
                updated_at = $3
            FROM previous
            WHERE w.id = previous.id
            RETURNING w.status, w.consecutive_failures, previous.status
            ",
        )
        .bind(webhook_id)
        .bind(succeeded)
        .bind(completed_at)
        .bind(to_i32(failure_threshold, "failure_threshold")?)
        .fetch_optional(&*self.pool)
        .await?;

        let (status, consecutive_failures, previous) =
            row.ok_or_else(|| CoreError::not_found("webhook", webhook_id))?;

        Ok(WebhookHealth {
            status,
            consecutive_failures: u32::try_from(consecutive_failures).unwrap_or(0),
            tripped: previous == WebhookStatus::Active && status == WebhookStatus::Failed,
        })
    }
}

pub(crate) fn to_i32(value: u32, field: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| CoreError::InvalidInput(format!("{field} out of range")))
}

pub(crate) fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| CoreError::InvalidInput(format!("{field} out of range")))
}
