//! Fan-out of platform events to subscribed webhooks.

use std::sync::Arc;

use courier_core::{
    models::{EventId, TenantId, WebhookAttempt, WebhookId},
    Clock, EventCatalog,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::{DeliveryError, Result},
    storage::DeliveryStorage,
};

/// What a dispatch enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Occurrence id shared by every attempt created for this event.
    pub event_id: EventId,
    /// Event name.
    pub event: String,
    /// Webhooks that received an initial attempt.
    pub webhook_ids: Vec<WebhookId>,
}

impl DispatchReport {
    /// Number of initial attempts created.
    pub fn attempts_created(&self) -> usize {
        self.webhook_ids.len()
    }
}

/// Turns event occurrences into pending attempts.
pub struct Dispatcher {
    storage: Arc<dyn DeliveryStorage>,
    clock: Arc<dyn Clock>,
    catalog: EventCatalog,
}

impl Dispatcher {
    /// Creates a dispatcher that accepts events from `catalog`.
    pub fn new(storage: Arc<dyn DeliveryStorage>, clock: Arc<dyn Clock>, catalog: EventCatalog) -> Self {
        Self { storage, clock, catalog }
    }

    /// Enqueues attempt 0, due now, for every active webhook of `tenant_id`
    /// subscribed to `event` whose filters match `payload`.
    ///
    /// All attempts are written in one batch; on error none are.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for events outside the catalog and
    /// `StorageError` if storage fails.
    pub async fn dispatch(
        &self,
        tenant_id: TenantId,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<DispatchReport> {
        if !self.catalog.contains(event) {
            return Err(DeliveryError::invalid_request(format!("unknown event: {event}")));
        }

        let event_id = EventId::new();
        let occurred_at = self.clock.now_utc();

        let webhooks = self.storage.find_subscribed(tenant_id, event.to_string()).await?;
        let attempts: Vec<WebhookAttempt> = webhooks
            .iter()
            .filter(|webhook| {
                let matches = webhook.matches_filters(&payload);
                if !matches {
                    debug!(webhook_id = %webhook.id, event, "payload filtered out");
                }
                matches
            })
            .map(|webhook| {
                WebhookAttempt::pending(
                    webhook,
                    event_id,
                    event,
                    payload.clone(),
                    occurred_at,
                    0,
                    occurred_at,
                    occurred_at,
                )
            })
            .collect();

        let webhook_ids: Vec<WebhookId> = attempts.iter().map(|a| a.webhook_id).collect();
        if !attempts.is_empty() {
            self.storage.create_attempts(attempts).await?;
        }

        info!(
            tenant_id = %tenant_id,
            event_id = %event_id,
            event,
            subscribed = webhooks.len(),
            enqueued = webhook_ids.len(),
            "event dispatched"
        );

        Ok(DispatchReport { event_id, event: event.to_string(), webhook_ids })
    }
}
