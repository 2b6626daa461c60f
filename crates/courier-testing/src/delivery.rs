//! Registration, dispatch and delivery helpers for TestEnv.
//!
//! Everything runs through the production registry, dispatcher and engine.
//! Only time and storage are simulated.

use anyhow::{bail, Context, Result};
use courier_core::models::{AttemptStatus, EventId, TenantId, Webhook, WebhookAttempt, WebhookId};
use courier_delivery::{DispatchReport, EngineStats, WebhookOptions};

use crate::TestEnv;

/// Upper bound on claim cycles in one drain, so a bug cannot hang a test.
const MAX_CYCLES: usize = 200;

impl TestEnv {
    /// Registers a webhook for `events` pointing at `path` on the receiver.
    ///
    /// # Errors
    ///
    /// Returns error if the registry rejects the registration.
    pub async fn register_webhook(
        &self,
        tenant_id: TenantId,
        path: &str,
        events: &[&str],
    ) -> Result<Webhook> {
        self.register_webhook_with(tenant_id, path, events, WebhookOptions::default()).await
    }

    /// Registers a webhook with explicit options.
    ///
    /// # Errors
    ///
    /// Returns error if the registry rejects the registration.
    pub async fn register_webhook_with(
        &self,
        tenant_id: TenantId,
        path: &str,
        events: &[&str],
        options: WebhookOptions,
    ) -> Result<Webhook> {
        let events = events.iter().map(ToString::to_string).collect();
        self.registry()
            .register(tenant_id, &self.endpoint_url(path), events, None, options)
            .await
            .context("webhook registration failed")
    }

    /// Inserts a prebuilt webhook without validation.
    pub async fn insert_webhook(&self, webhook: Webhook) -> Webhook {
        self.storage().insert_webhook(webhook.clone()).await;
        webhook
    }

    /// Dispatches an event through the production dispatcher.
    ///
    /// # Errors
    ///
    /// Returns error if the event is unknown or storage fails.
    pub async fn dispatch(
        &self,
        tenant_id: TenantId,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<DispatchReport> {
        self.dispatcher().dispatch(tenant_id, event, payload).await.context("dispatch failed")
    }

    /// Runs one claim-and-execute cycle. Returns the number of attempts
    /// executed.
    ///
    /// # Errors
    ///
    /// Returns error if claiming fails.
    pub async fn process_batch(&self) -> Result<usize> {
        let processed = self.engine().process_batch().await.context("failed to process batch")?;
        tracing::debug!(processed, "batch processing completed");
        Ok(processed)
    }

    /// Processes batches until nothing due remains at the current time.
    ///
    /// Returns the total number of attempts executed.
    ///
    /// # Errors
    ///
    /// Returns error if a batch fails or the cycle limit is exceeded.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut total = 0;
        for _ in 0..MAX_CYCLES {
            let processed = self.process_batch().await?;
            if processed == 0 {
                return Ok(total);
            }
            total += processed;
        }
        bail!("exceeded maximum processing cycles ({MAX_CYCLES})")
    }

    /// Advances the clock by `duration`, then drains due work.
    ///
    /// # Errors
    ///
    /// Returns error if processing fails.
    pub async fn advance_and_process(&self, duration: std::time::Duration) -> Result<usize> {
        self.advance_time(duration);
        self.run_until_idle().await
    }

    /// Repeatedly jumps the clock to the next scheduled attempt and drains,
    /// until no attempt of an active webhook is pending.
    ///
    /// Returns the total number of attempts executed.
    ///
    /// # Errors
    ///
    /// Returns error if processing fails or the cycle limit is exceeded.
    pub async fn run_to_completion(&self) -> Result<usize> {
        let mut total = self.run_until_idle().await?;
        for _ in 0..MAX_CYCLES {
            let Some(next) = self.next_due_at().await else {
                return Ok(total);
            };
            self.clock.advance_to(next);
            total += self.run_until_idle().await?;
        }
        bail!("exceeded maximum processing cycles ({MAX_CYCLES})")
    }

    /// Earliest `scheduled_at` among pending attempts of active webhooks.
    pub async fn next_due_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let storage = self.storage();
        let mut next = None;
        for attempt in storage.attempts().await {
            if attempt.status != AttemptStatus::Pending {
                continue;
            }
            let active =
                storage.webhook(attempt.webhook_id).await.is_some_and(|w| w.is_active());
            if active && next.map_or(true, |n| attempt.scheduled_at < n) {
                next = Some(attempt.scheduled_at);
            }
        }
        next
    }

    /// Attempts for one occurrence at one webhook, ordered by attempt number.
    pub async fn attempt_chain(&self, webhook_id: WebhookId, event_id: EventId) -> Vec<WebhookAttempt> {
        let mut chain: Vec<_> = self
            .storage()
            .attempts()
            .await
            .into_iter()
            .filter(|a| a.webhook_id == webhook_id && a.event_id == event_id)
            .collect();
        chain.sort_by_key(|a| a.attempt_number);
        chain
    }

    /// Every attempt for a webhook, in creation order.
    pub async fn attempts_for(&self, webhook_id: WebhookId) -> Vec<WebhookAttempt> {
        self.storage().attempts().await.into_iter().filter(|a| a.webhook_id == webhook_id).collect()
    }

    /// Current stored state of a webhook.
    ///
    /// # Errors
    ///
    /// Returns error if the webhook does not exist.
    pub async fn webhook(&self, webhook_id: WebhookId) -> Result<Webhook> {
        self.storage()
            .webhook(webhook_id)
            .await
            .with_context(|| format!("webhook {webhook_id} not found"))
    }

    /// Engine statistics.
    pub async fn delivery_stats(&self) -> EngineStats {
        self.engine().stats().await
    }
}
