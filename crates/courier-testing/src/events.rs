//! Delivery event recording for assertions.

use std::time::Duration;

use courier_core::{DeliveryEvent, EventHandler, WebhookId};
use tokio::sync::{Notify, RwLock};

/// Event handler that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    history: RwLock<Vec<DeliveryEvent>>,
    notify: Notify,
}

impl RecordingEventHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events in the order they were published.
    pub async fn history(&self) -> Vec<DeliveryEvent> {
        self.history.read().await.clone()
    }

    /// Events published for one webhook.
    pub async fn for_webhook(&self, webhook_id: WebhookId) -> Vec<DeliveryEvent> {
        self.history
            .read()
            .await
            .iter()
            .filter(|event| event.webhook_id() == webhook_id)
            .cloned()
            .collect()
    }

    /// Number of `Succeeded` events.
    pub async fn succeeded(&self) -> usize {
        self.count(|e| matches!(e, DeliveryEvent::Succeeded(_))).await
    }

    /// Number of `Failed` events.
    pub async fn failed(&self) -> usize {
        self.count(|e| matches!(e, DeliveryEvent::Failed(_))).await
    }

    /// Number of `Exhausted` events.
    pub async fn exhausted(&self) -> usize {
        self.count(|e| matches!(e, DeliveryEvent::Exhausted(_))).await
    }

    /// Number of `WebhookFailed` events.
    pub async fn webhook_failures(&self) -> usize {
        self.count(|e| matches!(e, DeliveryEvent::WebhookFailed(_))).await
    }

    /// Forgets everything recorded so far.
    pub async fn clear(&self) {
        self.history.write().await.clear();
    }

    /// Waits until at least `count` events were recorded.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.history.read().await.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    async fn count(&self, predicate: impl Fn(&DeliveryEvent) -> bool) -> usize {
        self.history.read().await.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        self.history.write().await.push(event);
        self.notify.notify_waiters();
    }
}
