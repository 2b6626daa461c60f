//! Execution of a single claimed attempt.
//!
//! ```text
//! claimed attempt
//!   -> envelope bytes -> sign -> POST (deadline, TLS policy)
//!   -> complete attempt (+ successor if the retry scheduler says so)
//!   -> webhook counters and failure threshold
//!   -> delivery events
//! ```
//!
//! The envelope is rebuilt from the attempt's payload snapshot on every try.
//! Serialization is deterministic, so retries of one occurrence carry the
//! same bytes and the same signature.

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_core::{
    models::{AttemptCompletion, AttemptStatus, EventId, TenantId, Webhook, WebhookAttempt},
    Clock, DeliveryEvent, DeliveryExhaustedEvent, DeliveryFailedEvent, DeliverySucceededEvent,
    EventHandler, WebhookFailedEvent,
};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    client::{DeliveryClient, DeliveryRequest, DeliveryResponse},
    error::{DeliveryError, ErrorCategory, Result},
    registry::FailurePolicy,
    retry::{RetryContext, RetryDecision, RetryPolicy},
    signer,
    storage::DeliveryStorage,
};

/// Receiver-facing idempotency key, the event occurrence id.
pub const ID_HEADER: &str = "X-Webhook-Id";
/// Event name header.
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Attempt number header, 0 for the first try.
pub const ATTEMPT_HEADER: &str = "X-Webhook-Attempt";
/// Send time header, unix seconds.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// JSON body posted to receivers.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    /// Event occurrence id.
    pub id: EventId,
    /// Event name.
    pub event: &'a str,
    /// When the event occurred, RFC 3339.
    pub timestamp: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Event payload.
    pub data: &'a serde_json::Value,
}

impl<'a> Envelope<'a> {
    /// Envelope for an attempt's occurrence.
    pub fn for_attempt(attempt: &'a WebhookAttempt) -> Self {
        Self {
            id: attempt.event_id,
            event: &attempt.event,
            timestamp: attempt.occurred_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            tenant_id: attempt.tenant_id,
            data: &attempt.payload,
        }
    }

    /// Serialized body bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the payload cannot be serialized.
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| DeliveryError::invalid_request(format!("payload not serializable: {e}")))
    }
}

/// How an executed attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Receiver answered 2xx.
    Delivered {
        /// Response status
        http_status: u16,
    },
    /// Failed; a successor is scheduled.
    Retrying {
        /// Successor's due time
        next_attempt_at: DateTime<Utc>,
    },
    /// Failed; the chain ends here.
    Exhausted {
        /// Why no successor was scheduled
        reason: String,
    },
    /// Webhook was no longer active; the attempt went back to `pending`.
    Released,
}

impl AttemptOutcome {
    /// Whether the receiver accepted the delivery.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Runs claimed attempts end to end.
pub struct AttemptExecutor {
    storage: Arc<dyn DeliveryStorage>,
    client: Arc<DeliveryClient>,
    retry_policy: RetryPolicy,
    failure_policy: FailurePolicy,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
}

impl AttemptExecutor {
    /// Creates an executor.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        client: Arc<DeliveryClient>,
        retry_policy: RetryPolicy,
        failure_policy: FailurePolicy,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self { storage, client, retry_policy, failure_policy, clock, event_handler }
    }

    /// Delivers one claimed attempt and records everything that follows
    /// from its outcome.
    ///
    /// Delivery failures are outcomes, not errors.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt or webhook cannot be read or
    /// written.
    pub async fn execute(&self, attempt: WebhookAttempt) -> Result<AttemptOutcome> {
        let span = info_span!(
            "deliver_attempt",
            attempt_id = %attempt.id,
            webhook_id = %attempt.webhook_id,
            event_id = %attempt.event_id,
            attempt = attempt.attempt_number,
        );

        self.execute_inner(attempt).instrument(span).await
    }

    async fn execute_inner(&self, attempt: WebhookAttempt) -> Result<AttemptOutcome> {
        let Some(webhook) = self.storage.find_webhook(attempt.webhook_id).await? else {
            self.storage.release_attempt(attempt.id).await?;
            return Err(DeliveryError::storage(format!("webhook {} not found", attempt.webhook_id)));
        };

        if !webhook.is_active() {
            self.storage.release_attempt(attempt.id).await?;
            debug!(status = %webhook.status, "webhook not active, attempt released");
            return Ok(AttemptOutcome::Released);
        }

        let started = Instant::now();
        let result = match self.build_request(&webhook, &attempt) {
            Ok(request) => self.client.deliver(request).await,
            Err(error) => Err(error),
        };
        let elapsed = started.elapsed();
        let completed_at = self.clock.now_utc();

        match result {
            Ok(response) if response.is_success() => {
                self.record_success(&webhook, &attempt, &response, completed_at).await
            },
            Ok(response) => {
                let error = response.error().unwrap_or(DeliveryError::UnexpectedStatus {
                    status_code: response.status_code,
                });
                self.record_failure(&webhook, &attempt, &error, Some(&response), elapsed, completed_at)
                    .await
            },
            Err(error) => {
                self.record_failure(&webhook, &attempt, &error, None, elapsed, completed_at).await
            },
        }
    }

    fn build_request(&self, webhook: &Webhook, attempt: &WebhookAttempt) -> Result<DeliveryRequest> {
        let body = Envelope::for_attempt(attempt).to_bytes()?;
        let signature = signer::sign(&webhook.secret, &body)
            .map_err(|e| DeliveryError::invalid_request(e.to_string()))?;

        let webhook_headers = vec![
            (signer::SIGNATURE_HEADER, signature),
            (ID_HEADER, attempt.event_id.to_string()),
            (EVENT_HEADER, attempt.event.clone()),
            (ATTEMPT_HEADER, attempt.attempt_number.to_string()),
            (TIMESTAMP_HEADER, self.clock.now_utc().timestamp().to_string()),
        ];

        Ok(DeliveryRequest {
            url: attempt.url.clone(),
            body,
            custom_headers: webhook.headers.clone(),
            webhook_headers,
            timeout: webhook.timeout(),
            verify_ssl: webhook.verify_ssl,
        })
    }

    async fn record_success(
        &self,
        webhook: &Webhook,
        attempt: &WebhookAttempt,
        response: &DeliveryResponse,
        completed_at: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        let completion = AttemptCompletion {
            status: AttemptStatus::Success,
            http_status: Some(response.status_code),
            response_body: Some(response.body.clone()),
            response_headers: Some(response.headers.clone()),
            error_message: None,
            duration_ms: Some(millis(response.duration)),
            completed_at,
            next_retry_at: None,
            exhausted: false,
        };

        self.storage.complete_attempt(attempt.id, completion, None).await?;
        self.storage
            .record_outcome(webhook.id, true, completed_at, self.failure_policy.threshold)
            .await?;

        info!(
            status_code = response.status_code,
            duration_ms = millis(response.duration),
            "webhook delivered"
        );

        self.event_handler
            .handle_event(DeliveryEvent::Succeeded(DeliverySucceededEvent {
                attempt_id: attempt.id,
                webhook_id: attempt.webhook_id,
                tenant_id: attempt.tenant_id,
                event_id: attempt.event_id,
                event: attempt.event.clone(),
                http_status: response.status_code,
                attempt_number: attempt.attempt_number,
                delivered_at: completed_at,
            }))
            .await;

        Ok(AttemptOutcome::Delivered { http_status: response.status_code })
    }

    async fn record_failure(
        &self,
        webhook: &Webhook,
        attempt: &WebhookAttempt,
        error: &DeliveryError,
        response: Option<&DeliveryResponse>,
        elapsed: std::time::Duration,
        completed_at: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        let decision = RetryContext::new(
            attempt.attempt_number,
            webhook.max_retries,
            error,
            completed_at,
            &self.retry_policy,
        )
        .decide_retry();

        let (next_retry_at, successor) = match &decision {
            RetryDecision::Retry { next_attempt_at } => (
                Some(*next_attempt_at),
                Some(attempt.successor(&webhook.url, *next_attempt_at, completed_at)),
            ),
            RetryDecision::GiveUp { .. } => (None, None),
        };

        let completion = AttemptCompletion {
            status: AttemptStatus::Failed,
            http_status: response.map(|r| r.status_code),
            response_body: response.map(|r| r.body.clone()),
            response_headers: response.map(|r| r.headers.clone()),
            error_message: Some(error.to_string()),
            duration_ms: Some(millis(response.map_or(elapsed, |r| r.duration))),
            completed_at,
            next_retry_at,
            exhausted: successor.is_none(),
        };

        self.storage.complete_attempt(attempt.id, completion, successor).await?;
        let health = self
            .storage
            .record_outcome(webhook.id, false, completed_at, self.failure_policy.threshold)
            .await?;

        warn!(
            error = %error,
            category = %ErrorCategory::from(error),
            retryable = error.is_retryable(),
            next_retry_at = ?next_retry_at,
            consecutive_failures = health.consecutive_failures,
            "webhook delivery failed"
        );

        self.event_handler
            .handle_event(DeliveryEvent::Failed(DeliveryFailedEvent {
                attempt_id: attempt.id,
                webhook_id: attempt.webhook_id,
                tenant_id: attempt.tenant_id,
                event_id: attempt.event_id,
                event: attempt.event.clone(),
                http_status: error.status_code(),
                attempt_number: attempt.attempt_number,
                failed_at: completed_at,
                error_message: error.to_string(),
                next_retry_at,
            }))
            .await;

        if health.tripped {
            warn!(
                consecutive_failures = health.consecutive_failures,
                threshold = self.failure_policy.threshold,
                "webhook moved to failed after consecutive failures"
            );
            self.event_handler
                .handle_event(DeliveryEvent::WebhookFailed(WebhookFailedEvent {
                    webhook_id: webhook.id,
                    tenant_id: webhook.tenant_id,
                    consecutive_failures: health.consecutive_failures,
                    failed_at: completed_at,
                }))
                .await;
        }

        match decision {
            RetryDecision::Retry { next_attempt_at } => Ok(AttemptOutcome::Retrying { next_attempt_at }),
            RetryDecision::GiveUp { reason } => {
                self.event_handler
                    .handle_event(DeliveryEvent::Exhausted(DeliveryExhaustedEvent {
                        attempt_id: attempt.id,
                        webhook_id: attempt.webhook_id,
                        tenant_id: attempt.tenant_id,
                        event_id: attempt.event_id,
                        total_attempts: attempt.attempt_number + 1,
                        reason: reason.clone(),
                    }))
                    .await;
                Ok(AttemptOutcome::Exhausted { reason })
            },
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
