//! Storage abstraction layer for the delivery engine.
//!
//! The registry, dispatcher, executor and workers only talk to storage
//! through `DeliveryStorage`. Production wraps the Postgres repositories in
//! `courier_core::storage::Storage`; tests use the in-memory
//! [`mock::MockDeliveryStorage`], which implements the same claim and
//! health-counter semantics.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use courier_core::{
    error::{CoreError, Result},
    models::{
        AttemptCompletion, AttemptId, EventId, TenantId, Webhook, WebhookAttempt, WebhookHealth,
        WebhookId, WebhookStatus,
    },
};

/// Boxed future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage operations required by the delivery engine.
pub trait DeliveryStorage: Send + Sync + 'static {
    /// Persists a newly registered webhook.
    fn create_webhook(&self, webhook: Webhook) -> StorageFuture<'_, ()>;

    /// Looks up a webhook.
    fn find_webhook(&self, webhook_id: WebhookId) -> StorageFuture<'_, Option<Webhook>>;

    /// Lists a tenant's webhooks, newest first.
    fn list_webhooks(&self, tenant_id: TenantId) -> StorageFuture<'_, Vec<Webhook>>;

    /// Active webhooks of `tenant_id` subscribed to `event`, oldest first.
    fn find_subscribed(&self, tenant_id: TenantId, event: String)
        -> StorageFuture<'_, Vec<Webhook>>;

    /// Changes a webhook's status. Moving to `Active` clears the failure
    /// streak.
    ///
    /// Fails with `CoreError::NotFound` for unknown webhooks.
    fn set_webhook_status(
        &self,
        webhook_id: WebhookId,
        status: WebhookStatus,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, Webhook>;

    /// Applies one attempt outcome to the webhook counters and failure
    /// threshold as a single atomic update.
    fn record_outcome(
        &self,
        webhook_id: WebhookId,
        succeeded: bool,
        completed_at: DateTime<Utc>,
        failure_threshold: u32,
    ) -> StorageFuture<'_, WebhookHealth>;

    /// Inserts a batch of new attempts atomically.
    fn create_attempts(&self, attempts: Vec<WebhookAttempt>) -> StorageFuture<'_, ()>;

    /// Claims up to `limit` due attempts, at most one per webhook, skipping
    /// webhooks that are not active or already have an attempt in flight.
    fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> StorageFuture<'_, Vec<WebhookAttempt>>;

    /// Records an attempt's outcome and inserts its successor, if any, in one
    /// atomic step.
    fn complete_attempt(
        &self,
        attempt_id: AttemptId,
        completion: AttemptCompletion,
        successor: Option<WebhookAttempt>,
    ) -> StorageFuture<'_, ()>;

    /// Returns a claimed attempt to `pending` without an outcome.
    fn release_attempt(&self, attempt_id: AttemptId) -> StorageFuture<'_, ()>;

    /// Returns attempts claimed before `cutoff` to `pending`.
    fn release_stale(&self, cutoff: DateTime<Utc>) -> StorageFuture<'_, u64>;

    /// Looks up an attempt.
    fn find_attempt(&self, attempt_id: AttemptId) -> StorageFuture<'_, Option<WebhookAttempt>>;

    /// Retry chain for one event occurrence, ordered by attempt number.
    fn find_attempt_chain(
        &self,
        webhook_id: WebhookId,
        event_id: EventId,
    ) -> StorageFuture<'_, Vec<WebhookAttempt>>;

    /// Most recent attempts of a webhook, newest first.
    fn find_attempts_by_webhook(
        &self,
        webhook_id: WebhookId,
        limit: usize,
    ) -> StorageFuture<'_, Vec<WebhookAttempt>>;

    /// Attempts waiting to be claimed.
    fn count_pending(&self) -> StorageFuture<'_, u64>;

    /// Verifies the backing store is reachable.
    fn health_check(&self) -> StorageFuture<'_, ()>;
}

/// Production storage implementation using PostgreSQL.
pub struct PostgresDeliveryStorage {
    storage: Arc<courier_core::storage::Storage>,
}

impl PostgresDeliveryStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<courier_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl DeliveryStorage for PostgresDeliveryStorage {
    fn create_webhook(&self, webhook: Webhook) -> StorageFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhooks.create(&webhook).await.map(|_| ()) })
    }

    fn find_webhook(&self, webhook_id: WebhookId) -> StorageFuture<'_, Option<Webhook>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhooks.find_by_id(webhook_id).await })
    }

    fn list_webhooks(&self, tenant_id: TenantId) -> StorageFuture<'_, Vec<Webhook>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhooks.find_by_tenant(tenant_id).await })
    }

    fn find_subscribed(
        &self,
        tenant_id: TenantId,
        event: String,
    ) -> StorageFuture<'_, Vec<Webhook>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhooks.find_subscribed(tenant_id, &event).await })
    }

    fn set_webhook_status(
        &self,
        webhook_id: WebhookId,
        status: WebhookStatus,
        now: DateTime<Utc>,
    ) -> StorageFuture<'_, Webhook> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhooks.set_status(webhook_id, status, now).await })
    }

    fn record_outcome(
        &self,
        webhook_id: WebhookId,
        succeeded: bool,
        completed_at: DateTime<Utc>,
        failure_threshold: u32,
    ) -> StorageFuture<'_, WebhookHealth> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .webhooks
                .record_outcome(webhook_id, succeeded, completed_at, failure_threshold)
                .await
        })
    }

    fn create_attempts(&self, attempts: Vec<WebhookAttempt>) -> StorageFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_attempts.create_many(&attempts).await })
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StorageFuture<'_, Vec<WebhookAttempt>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            match storage.webhook_attempts.claim_due(now, to_limit(limit)).await {
                // Lost a race on the one-in-flight index; next poll picks it up.
                Err(CoreError::ConstraintViolation(message)) => {
                    tracing::debug!(%message, "concurrent claim collided");
                    Ok(Vec::new())
                },
                other => other,
            }
        })
    }

    fn complete_attempt(
        &self,
        attempt_id: AttemptId,
        completion: AttemptCompletion,
        successor: Option<WebhookAttempt>,
    ) -> StorageFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.webhook_attempts.complete(attempt_id, &completion, successor.as_ref()).await
        })
    }

    fn release_attempt(&self, attempt_id: AttemptId) -> StorageFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_attempts.release(attempt_id).await })
    }

    fn release_stale(&self, cutoff: DateTime<Utc>) -> StorageFuture<'_, u64> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_attempts.release_stale(cutoff).await })
    }

    fn find_attempt(&self, attempt_id: AttemptId) -> StorageFuture<'_, Option<WebhookAttempt>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_attempts.find_by_id(attempt_id).await })
    }

    fn find_attempt_chain(
        &self,
        webhook_id: WebhookId,
        event_id: EventId,
    ) -> StorageFuture<'_, Vec<WebhookAttempt>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.webhook_attempts.find_chain(webhook_id, event_id).await })
    }

    fn find_attempts_by_webhook(
        &self,
        webhook_id: WebhookId,
        limit: usize,
    ) -> StorageFuture<'_, Vec<WebhookAttempt>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.webhook_attempts.find_by_webhook(webhook_id, to_limit(limit)).await
        })
    }

    fn count_pending(&self) -> StorageFuture<'_, u64> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let count = storage.webhook_attempts.count_pending().await?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    fn health_check(&self) -> StorageFuture<'_, ()> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory storage for tests.
    //!
    //! All state sits behind one lock so claims, completions and counter
    //! updates are atomic, the way the Postgres statements are. Supports
    //! one-shot error injection for claim and complete.

    use std::{collections::HashMap, sync::Arc};

    use chrono::{DateTime, Utc};
    use courier_core::{
        error::CoreError,
        models::{AttemptStatus, WebhookAttempt, WebhookHealth, WebhookStatus},
    };
    use tokio::sync::RwLock;

    use super::{
        AttemptCompletion, AttemptId, DeliveryStorage, EventId, StorageFuture, TenantId, Webhook,
        WebhookId,
    };

    #[derive(Default)]
    struct State {
        webhooks: HashMap<WebhookId, Webhook>,
        attempts: Vec<WebhookAttempt>,
        claim_error: Option<String>,
        complete_error: Option<String>,
    }

    impl State {
        fn attempt_mut(&mut self, attempt_id: AttemptId) -> Option<&mut WebhookAttempt> {
            self.attempts.iter_mut().find(|a| a.id == attempt_id)
        }

        fn check_insertable(&self, attempt: &WebhookAttempt) -> Result<(), CoreError> {
            if !self.webhooks.contains_key(&attempt.webhook_id) {
                return Err(CoreError::ConstraintViolation(format!(
                    "webhook {} does not exist",
                    attempt.webhook_id
                )));
            }
            let duplicate = self.attempts.iter().any(|a| {
                a.id == attempt.id
                    || (a.webhook_id == attempt.webhook_id
                        && a.event_id == attempt.event_id
                        && a.attempt_number == attempt.attempt_number)
            });
            if duplicate {
                return Err(CoreError::ConstraintViolation(format!(
                    "attempt {} of event {} already exists",
                    attempt.attempt_number, attempt.event_id
                )));
            }
            Ok(())
        }
    }

    /// In-memory `DeliveryStorage`.
    #[derive(Clone, Default)]
    pub struct MockDeliveryStorage {
        state: Arc<RwLock<State>>,
    }

    impl MockDeliveryStorage {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts or replaces a webhook directly.
        pub async fn insert_webhook(&self, webhook: Webhook) {
            self.state.write().await.webhooks.insert(webhook.id, webhook);
        }

        /// Current state of a webhook.
        pub async fn webhook(&self, webhook_id: WebhookId) -> Option<Webhook> {
            self.state.read().await.webhooks.get(&webhook_id).cloned()
        }

        /// Every attempt in insertion order.
        pub async fn attempts(&self) -> Vec<WebhookAttempt> {
            self.state.read().await.attempts.clone()
        }

        /// Attempts currently in `delivering` for a webhook.
        pub async fn delivering_count(&self, webhook_id: WebhookId) -> usize {
            self.state
                .read()
                .await
                .attempts
                .iter()
                .filter(|a| a.webhook_id == webhook_id && a.status == AttemptStatus::Delivering)
                .count()
        }

        /// Fails the next claim with a database error.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            self.state.write().await.claim_error = Some(error.into());
        }

        /// Fails the next completion with a database error.
        pub async fn inject_complete_error(&self, error: impl Into<String>) {
            self.state.write().await.complete_error = Some(error.into());
        }
    }

    impl DeliveryStorage for MockDeliveryStorage {
        fn create_webhook(&self, webhook: Webhook) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                if state.webhooks.contains_key(&webhook.id) {
                    return Err(CoreError::ConstraintViolation(format!(
                        "webhook {} already exists",
                        webhook.id
                    )));
                }
                state.webhooks.insert(webhook.id, webhook);
                Ok(())
            })
        }

        fn find_webhook(&self, webhook_id: WebhookId) -> StorageFuture<'_, Option<Webhook>> {
            Box::pin(async move { Ok(self.webhook(webhook_id).await) })
        }

        fn list_webhooks(&self, tenant_id: TenantId) -> StorageFuture<'_, Vec<Webhook>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut webhooks: Vec<_> =
                    state.webhooks.values().filter(|w| w.tenant_id == tenant_id).cloned().collect();
                webhooks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(webhooks)
            })
        }

        fn find_subscribed(
            &self,
            tenant_id: TenantId,
            event: String,
        ) -> StorageFuture<'_, Vec<Webhook>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut webhooks: Vec<_> = state
                    .webhooks
                    .values()
                    .filter(|w| w.tenant_id == tenant_id && w.is_active() && w.subscribes_to(&event))
                    .cloned()
                    .collect();
                webhooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                Ok(webhooks)
            })
        }

        fn set_webhook_status(
            &self,
            webhook_id: WebhookId,
            status: WebhookStatus,
            now: DateTime<Utc>,
        ) -> StorageFuture<'_, Webhook> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let webhook = state
                    .webhooks
                    .get_mut(&webhook_id)
                    .ok_or_else(|| CoreError::not_found("webhook", webhook_id))?;
                webhook.status = status;
                if status == WebhookStatus::Active {
                    webhook.consecutive_failures = 0;
                }
                webhook.updated_at = now;
                Ok(webhook.clone())
            })
        }

        fn record_outcome(
            &self,
            webhook_id: WebhookId,
            succeeded: bool,
            completed_at: DateTime<Utc>,
            failure_threshold: u32,
        ) -> StorageFuture<'_, WebhookHealth> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let webhook = state
                    .webhooks
                    .get_mut(&webhook_id)
                    .ok_or_else(|| CoreError::not_found("webhook", webhook_id))?;

                let previous = webhook.status;
                webhook.total_attempts += 1;
                if succeeded {
                    webhook.successful_attempts += 1;
                    webhook.consecutive_failures = 0;
                    webhook.last_success_at = Some(completed_at);
                } else {
                    webhook.failed_attempts += 1;
                    webhook.consecutive_failures += 1;
                    webhook.last_failure_at = Some(completed_at);
                    if failure_threshold > 0
                        && previous == WebhookStatus::Active
                        && webhook.consecutive_failures >= failure_threshold
                    {
                        webhook.status = WebhookStatus::Failed;
                    }
                }
                webhook.updated_at = completed_at;

                Ok(WebhookHealth {
                    status: webhook.status,
                    consecutive_failures: webhook.consecutive_failures,
                    tripped: previous == WebhookStatus::Active
                        && webhook.status == WebhookStatus::Failed,
                })
            })
        }

        fn create_attempts(&self, attempts: Vec<WebhookAttempt>) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let mut staged: Vec<WebhookAttempt> = Vec::with_capacity(attempts.len());
                for attempt in attempts {
                    state.check_insertable(&attempt)?;
                    if staged.iter().any(|s| {
                        s.webhook_id == attempt.webhook_id
                            && s.event_id == attempt.event_id
                            && s.attempt_number == attempt.attempt_number
                    }) {
                        return Err(CoreError::ConstraintViolation(
                            "duplicate attempt in batch".to_string(),
                        ));
                    }
                    staged.push(attempt);
                }
                state.attempts.extend(staged);
                Ok(())
            })
        }

        fn claim_due(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> StorageFuture<'_, Vec<WebhookAttempt>> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                if let Some(error) = state.claim_error.take() {
                    return Err(CoreError::Database(error));
                }

                let mut earliest: HashMap<WebhookId, usize> = HashMap::new();
                for (index, attempt) in state.attempts.iter().enumerate() {
                    let eligible = attempt.status == AttemptStatus::Pending
                        && attempt.scheduled_at <= now
                        && state.webhooks.get(&attempt.webhook_id).is_some_and(Webhook::is_active);
                    if !eligible {
                        continue;
                    }
                    earliest
                        .entry(attempt.webhook_id)
                        .and_modify(|current| {
                            let best = &state.attempts[*current];
                            if (attempt.scheduled_at, attempt.attempt_number)
                                < (best.scheduled_at, best.attempt_number)
                            {
                                *current = index;
                            }
                        })
                        .or_insert(index);
                }

                let in_flight: Vec<WebhookId> = state
                    .attempts
                    .iter()
                    .filter(|a| a.status == AttemptStatus::Delivering)
                    .map(|a| a.webhook_id)
                    .collect();

                let mut candidates: Vec<usize> = earliest
                    .into_iter()
                    .filter(|(webhook_id, _)| !in_flight.contains(webhook_id))
                    .map(|(_, index)| index)
                    .collect();
                candidates.sort_by_key(|&index| state.attempts[index].scheduled_at);
                candidates.truncate(limit);

                let mut claimed = Vec::with_capacity(candidates.len());
                for index in candidates {
                    let attempt = &mut state.attempts[index];
                    attempt.status = AttemptStatus::Delivering;
                    attempt.claimed_at = Some(now);
                    claimed.push(attempt.clone());
                }

                Ok(claimed)
            })
        }

        fn complete_attempt(
            &self,
            attempt_id: AttemptId,
            completion: AttemptCompletion,
            successor: Option<WebhookAttempt>,
        ) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                if let Some(error) = state.complete_error.take() {
                    return Err(CoreError::Database(error));
                }

                let delivering = state
                    .attempts
                    .iter()
                    .any(|a| a.id == attempt_id && a.status == AttemptStatus::Delivering);
                if !delivering {
                    return Err(CoreError::not_found("delivering attempt", attempt_id));
                }
                if let Some(successor) = &successor {
                    state.check_insertable(successor)?;
                }

                if let Some(attempt) = state.attempt_mut(attempt_id) {
                    attempt.apply(&completion);
                }
                if let Some(successor) = successor {
                    state.attempts.push(successor);
                }
                Ok(())
            })
        }

        fn release_attempt(&self, attempt_id: AttemptId) -> StorageFuture<'_, ()> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                if let Some(attempt) = state.attempt_mut(attempt_id) {
                    if attempt.status == AttemptStatus::Delivering {
                        attempt.status = AttemptStatus::Pending;
                        attempt.claimed_at = None;
                    }
                }
                Ok(())
            })
        }

        fn release_stale(&self, cutoff: DateTime<Utc>) -> StorageFuture<'_, u64> {
            Box::pin(async move {
                let mut state = self.state.write().await;
                let mut released = 0;
                for attempt in &mut state.attempts {
                    if attempt.status == AttemptStatus::Delivering
                        && attempt.claimed_at.is_some_and(|claimed| claimed < cutoff)
                    {
                        attempt.status = AttemptStatus::Pending;
                        attempt.claimed_at = None;
                        released += 1;
                    }
                }
                Ok(released)
            })
        }

        fn find_attempt(
            &self,
            attempt_id: AttemptId,
        ) -> StorageFuture<'_, Option<WebhookAttempt>> {
            Box::pin(async move {
                Ok(self.state.read().await.attempts.iter().find(|a| a.id == attempt_id).cloned())
            })
        }

        fn find_attempt_chain(
            &self,
            webhook_id: WebhookId,
            event_id: EventId,
        ) -> StorageFuture<'_, Vec<WebhookAttempt>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut chain: Vec<_> = state
                    .attempts
                    .iter()
                    .filter(|a| a.webhook_id == webhook_id && a.event_id == event_id)
                    .cloned()
                    .collect();
                chain.sort_by_key(|a| a.attempt_number);
                Ok(chain)
            })
        }

        fn find_attempts_by_webhook(
            &self,
            webhook_id: WebhookId,
            limit: usize,
        ) -> StorageFuture<'_, Vec<WebhookAttempt>> {
            Box::pin(async move {
                let state = self.state.read().await;
                let mut attempts: Vec<_> =
                    state.attempts.iter().filter(|a| a.webhook_id == webhook_id).cloned().collect();
                attempts.sort_by(|a, b| {
                    (b.created_at, b.attempt_number).cmp(&(a.created_at, a.attempt_number))
                });
                attempts.truncate(limit);
                Ok(attempts)
            })
        }

        fn count_pending(&self) -> StorageFuture<'_, u64> {
            Box::pin(async move {
                let state = self.state.read().await;
                let pending =
                    state.attempts.iter().filter(|a| a.status == AttemptStatus::Pending).count();
                Ok(pending as u64)
            })
        }

        fn health_check(&self) -> StorageFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

}
