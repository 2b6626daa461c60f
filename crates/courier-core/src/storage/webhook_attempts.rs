//! Repository for delivery attempt rows.
//!
//! Attempts form chains per (webhook, event occurrence). The claim query and
//! the `idx_webhook_attempts_one_in_flight` partial unique index together
//! keep at most one attempt per webhook in `delivering`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{types::Json, Executor, PgPool, Postgres, Transaction};
use tracing::debug;

use super::webhooks::{to_i32, to_i64};
use crate::{
    error::{CoreError, Result},
    models::{AttemptCompletion, AttemptId, EventId, WebhookAttempt, WebhookId},
};

/// Repository for delivery attempt database operations.
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

    /// Inserts a single attempt.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or the attempt number is already taken
    /// for this chain.
    pub async fn create(&self, attempt: &WebhookAttempt) -> Result<AttemptId> {
        self.create_impl(&*self.pool, attempt).await
    }

    /// Inserts an attempt within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        attempt: &WebhookAttempt,
    ) -> Result<AttemptId> {
        self.create_impl(&mut **tx, attempt).await
    }

    /// Inserts a fan-out batch atomically.
    ///
    /// # Errors
    ///
    /// Returns error if any insert fails; nothing is written in that case.
    pub async fn create_many(&self, attempts: &[WebhookAttempt]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for attempt in attempts {
            self.create_in_tx(&mut tx, attempt).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn create_impl<'e, E>(&self, executor: E, attempt: &WebhookAttempt) -> Result<AttemptId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO webhook_attempts (
                id, webhook_id, tenant_id, event_id, event, payload, occurred_at, url,
                status, attempt_number, http_status, response_body, response_headers,
                error_message, duration_ms, scheduled_at, next_retry_at, exhausted,
                claimed_at, created_at, completed_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21
            )
            RETURNING id
            ",
        )
        .bind(attempt.id)
        .bind(attempt.webhook_id)
        .bind(attempt.tenant_id)
        .bind(attempt.event_id)
        .bind(&attempt.event)
        .bind(&attempt.payload)
        .bind(attempt.occurred_at)
        .bind(&attempt.url)
        .bind(attempt.status)
        .bind(to_i32(attempt.attempt_number, "attempt_number")?)
        .bind(attempt.http_status.map(i32::from))
        .bind(&attempt.response_body)
        .bind(attempt.response_headers.as_ref().map(Json))
        .bind(&attempt.error_message)
        .bind(attempt.duration_ms.map(|d| to_i64(d, "duration_ms")).transpose()?)
        .bind(attempt.scheduled_at)
        .bind(attempt.next_retry_at)
        .bind(attempt.exhausted)
        .bind(attempt.claimed_at)
        .bind(attempt.created_at)
        .bind(attempt.completed_at)
        .fetch_one(executor)
        .await?;

        Ok(AttemptId(id))
    }

    /// Finds an attempt by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, attempt_id: AttemptId) -> Result<Option<WebhookAttempt>> {
        let attempt = sqlx::query_as::<_, WebhookAttempt>(
            r"
            SELECT id, webhook_id, tenant_id, event_id, event, payload, occurred_at, url,
                   status, attempt_number, http_status, response_body, response_headers,
                   error_message, duration_ms, scheduled_at, next_retry_at, exhausted,
                   claimed_at, created_at, completed_at
            FROM webhook_attempts
            WHERE id = $1
            ",
        )
        .bind(attempt_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(attempt)
    }

    /// Returns the retry chain of one event occurrence for one webhook,
    /// ordered by attempt number.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_chain(
        &self,
        webhook_id: WebhookId,
        event_id: EventId,
    ) -> Result<Vec<WebhookAttempt>> {
        let attempts = sqlx::query_as::<_, WebhookAttempt>(
            r"
            SELECT id, webhook_id, tenant_id, event_id, event, payload, occurred_at, url,
                   status, attempt_number, http_status, response_body, response_headers,
                   error_message, duration_ms, scheduled_at, next_retry_at, exhausted,
                   claimed_at, created_at, completed_at
            FROM webhook_attempts
            WHERE webhook_id = $1 AND event_id = $2
            ORDER BY attempt_number ASC
            ",
        )
        .bind(webhook_id)
        .bind(event_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(attempts)
    }

    /// Most recent attempts for a webhook, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_webhook(
        &self,
        webhook_id: WebhookId,
        limit: i64,
    ) -> Result<Vec<WebhookAttempt>> {
        let attempts = sqlx::query_as::<_, WebhookAttempt>(
            r"
            SELECT id, webhook_id, tenant_id, event_id, event, payload, occurred_at, url,
                   status, attempt_number, http_status, response_body, response_headers,
                   error_message, duration_ms, scheduled_at, next_retry_at, exhausted,
                   claimed_at, created_at, completed_at
            FROM webhook_attempts
            WHERE webhook_id = $1
            ORDER BY created_at DESC, attempt_number DESC
            LIMIT $2
            ",
        )
        .bind(webhook_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(attempts)
    }

    /// Claims up to `limit` due attempts, at most one per webhook.
    ///
    /// Skips webhooks that are not active or that already have an attempt in
    /// flight. Candidate rows are locked with `SKIP LOCKED`, so a concurrent
    /// claimer passes over them instead of waiting. The outer
    /// `status = 'pending'` re-check covers rows that were claimed and
    /// committed after this statement's snapshot was taken.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConstraintViolation` if another worker claimed a
    /// different attempt for the same webhook concurrently; the caller retries
    /// on its next poll.
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookAttempt>> {
        let attempts = sqlx::query_as::<_, WebhookAttempt>(
            r"
            WITH candidates AS (
                SELECT DISTINCT ON (a.webhook_id) a.id
                FROM webhook_attempts a
                JOIN webhooks w ON w.id = a.webhook_id
                WHERE a.status = 'pending'
                  AND a.scheduled_at <= $1
                  AND w.status = 'active'
                  AND NOT EXISTS (
                      SELECT 1 FROM webhook_attempts d
                      WHERE d.webhook_id = a.webhook_id AND d.status = 'delivering'
                  )
                ORDER BY a.webhook_id, a.scheduled_at, a.attempt_number
            ),
            limited AS (
                SELECT id FROM candidates LIMIT $2
            ),
            locked AS (
                SELECT id FROM webhook_attempts
                WHERE id IN (SELECT id FROM limited)
                FOR UPDATE SKIP LOCKED
            )
            UPDATE webhook_attempts
            SET status = 'delivering', claimed_at = $1
            WHERE id IN (SELECT id FROM locked)
              AND status = 'pending'
            RETURNING id, webhook_id, tenant_id, event_id, event, payload, occurred_at, url,
                      status, attempt_number, http_status, response_body, response_headers,
                      error_message, duration_ms, scheduled_at, next_retry_at, exhausted,
                      claimed_at, created_at, completed_at
            ",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        if !attempts.is_empty() {
            debug!(claimed = attempts.len(), "claimed due attempts");
        }

        Ok(attempts)
    }

    /// Writes an attempt's outcome and, when given, inserts its successor in
    /// the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the attempt is not currently
    /// `delivering`.
    pub async fn complete(
        &self,
        attempt_id: AttemptId,
        completion: &AttemptCompletion,
        successor: Option<&WebhookAttempt>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r"
            UPDATE webhook_attempts
            SET status = $2,
                http_status = $3,
                response_body = $4,
                response_headers = $5,
                error_message = $6,
                duration_ms = $7,
                completed_at = $8,
                next_retry_at = $9,
                exhausted = $10
            WHERE id = $1 AND status = 'delivering'
            ",
        )
        .bind(attempt_id)
        .bind(completion.status)
        .bind(completion.http_status.map(i32::from))
        .bind(&completion.response_body)
        .bind(completion.response_headers.as_ref().map(Json))
        .bind(&completion.error_message)
        .bind(completion.duration_ms.map(|d| to_i64(d, "duration_ms")).transpose()?)
        .bind(completion.completed_at)
        .bind(completion.next_retry_at)
        .bind(completion.exhausted)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("delivering attempt", attempt_id));
        }

        if let Some(successor) = successor {
            self.create_in_tx(&mut tx, successor).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns a claimed attempt to `pending` without recording an outcome.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn release(&self, attempt_id: AttemptId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_attempts
            SET status = 'pending', claimed_at = NULL
            WHERE id = $1 AND status = 'delivering'
            ",
        )
        .bind(attempt_id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Returns attempts claimed before `cutoff` to `pending`.
    ///
    /// Recovers work held by a worker that died mid-delivery.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn release_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE webhook_attempts
            SET status = 'pending', claimed_at = NULL
            WHERE status = 'delivering' AND claimed_at < $1
            ",
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Number of attempts waiting to be claimed.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count_pending(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM webhook_attempts WHERE status = 'pending'")
                .fetch_one(&*self.pool)
                .await?;

        Ok(count)
    }
}
