//! Delivery notifications for components that observe the engine.
//!
//! The executor publishes a `DeliveryEvent` after every attempt and when a
//! webhook trips its failure threshold. Subscribers implement
//! `EventHandler`; `MulticastEventHandler` fans one event out to several.
//!
//! ```text
//! ┌──────────────────┐  DeliveryEvent  ┌───────────────────────┐
//! │ AttemptExecutor  │ ──────────────▶ │ MulticastEventHandler │
//! └──────────────────┘                 └───────────────────────┘
//!                                          │            │
//!                                          ▼            ▼
//!                                   metrics/alerts   audit log
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AttemptId, EventId, TenantId, WebhookId};

/// Events emitted by the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// An attempt received a 2xx response.
    Succeeded(DeliverySucceededEvent),

    /// An attempt failed. A retry may follow.
    Failed(DeliveryFailedEvent),

    /// A retry chain ended without success.
    Exhausted(DeliveryExhaustedEvent),

    /// A webhook was moved to `failed` by the consecutive failure policy.
    WebhookFailed(WebhookFailedEvent),
}

impl DeliveryEvent {
    /// Webhook the event is about.
    pub fn webhook_id(&self) -> WebhookId {
        match self {
            Self::Succeeded(e) => e.webhook_id,
            Self::Failed(e) => e.webhook_id,
            Self::Exhausted(e) => e.webhook_id,
            Self::WebhookFailed(e) => e.webhook_id,
        }
    }
}

/// Emitted when an attempt succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySucceededEvent {
    /// Attempt that succeeded.
    pub attempt_id: AttemptId,
    /// Webhook delivered to.
    pub webhook_id: WebhookId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Event occurrence.
    pub event_id: EventId,
    /// Event name.
    pub event: String,
    /// HTTP status returned by the endpoint.
    pub http_status: u16,
    /// 0-based attempt number.
    pub attempt_number: u32,
    /// Completion time.
    pub delivered_at: DateTime<Utc>,
}

/// Emitted when an attempt fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailedEvent {
    /// Attempt that failed.
    pub attempt_id: AttemptId,
    /// Webhook delivered to.
    pub webhook_id: WebhookId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Event occurrence.
    pub event_id: EventId,
    /// Event name.
    pub event: String,
    /// HTTP status, if the endpoint responded.
    pub http_status: Option<u16>,
    /// 0-based attempt number.
    pub attempt_number: u32,
    /// Completion time.
    pub failed_at: DateTime<Utc>,
    /// Failure description.
    pub error_message: String,
    /// When the successor runs, if one was scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Emitted when a retry chain gives up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryExhaustedEvent {
    /// Last attempt of the chain.
    pub attempt_id: AttemptId,
    /// Webhook delivered to.
    pub webhook_id: WebhookId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Event occurrence.
    pub event_id: EventId,
    /// Attempts made, including the initial one.
    pub total_attempts: u32,
    /// Why no further attempt is scheduled.
    pub reason: String,
}

/// Emitted when a webhook trips the consecutive failure threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookFailedEvent {
    /// Webhook that was moved to `failed`.
    pub webhook_id: WebhookId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Failure streak that tripped the threshold.
    pub consecutive_failures: u32,
    /// When the transition happened.
    pub failed_at: DateTime<Utc>,
}

/// Subscriber side of the delivery event stream.
///
/// Handlers must not block delivery; failures are logged, not propagated.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a delivery event.
    async fn handle_event(&self, event: DeliveryEvent);
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DeliveryEvent) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingEventHandler;

#[async_trait::async_trait]
impl EventHandler for TracingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        match event {
            DeliveryEvent::Succeeded(e) => tracing::debug!(
                webhook_id = %e.webhook_id,
                event_id = %e.event_id,
                attempt = e.attempt_number,
                status = e.http_status,
                "delivery succeeded"
            ),
            DeliveryEvent::Failed(e) => tracing::debug!(
                webhook_id = %e.webhook_id,
                event_id = %e.event_id,
                attempt = e.attempt_number,
                error = %e.error_message,
                "delivery failed"
            ),
            DeliveryEvent::Exhausted(e) => tracing::warn!(
                webhook_id = %e.webhook_id,
                event_id = %e.event_id,
                attempts = e.total_attempts,
                reason = %e.reason,
                "delivery chain exhausted"
            ),
            DeliveryEvent::WebhookFailed(e) => tracing::warn!(
                webhook_id = %e.webhook_id,
                tenant_id = %e.tenant_id,
                consecutive_failures = e.consecutive_failures,
                "webhook moved to failed"
            ),
        }
    }
}

/// Forwards events to every subscriber concurrently.
#[derive(Debug, Clone)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a new multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for MulticastEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        let futures = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move {
                handler.handle_event(event).await;
            }
        });

        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: DeliveryEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn webhook_failed_event() -> DeliveryEvent {
        DeliveryEvent::WebhookFailed(WebhookFailedEvent {
            webhook_id: WebhookId::new(),
            tenant_id: TenantId::new(),
            consecutive_failures: 5,
            failed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn multicast_reaches_every_subscriber() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut multicast = MulticastEventHandler::new();
        multicast.add_subscriber(Arc::new(CountingHandler { count: count.clone() }));
        multicast.add_subscriber(Arc::new(CountingHandler { count: count.clone() }));
        multicast.add_subscriber(Arc::new(TracingEventHandler));

        multicast.handle_event(webhook_failed_event()).await;

        assert_eq!(multicast.subscriber_count(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_multicast_is_a_no_op() {
        MulticastEventHandler::new().handle_event(webhook_failed_event()).await;
        NoOpEventHandler::new().handle_event(webhook_failed_event()).await;
    }

    #[test]
    fn webhook_id_is_exposed_for_every_variant() {
        let event = webhook_failed_event();
        let DeliveryEvent::WebhookFailed(inner) = &event else { panic!("wrong variant") };
        assert_eq!(event.webhook_id(), inner.webhook_id);
    }
}
