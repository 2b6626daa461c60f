//! Webhook registration and management handlers.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use courier_core::{
    AttemptId, AttemptStatus, EventId, TenantId, Webhook, WebhookAttempt, WebhookId,
    WebhookStatus,
};
use courier_delivery::WebhookOptions;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{error::Result, AppState};

const DEFAULT_ATTEMPT_LIMIT: usize = 50;
const MAX_ATTEMPT_LIMIT: usize = 500;

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    /// Target URL
    pub url: String,
    /// Subscribed event names
    pub events: Vec<String>,
    /// Signing secret; generated when absent
    #[serde(default)]
    pub secret: Option<String>,
    /// Optional delivery settings
    #[serde(flatten)]
    pub options: WebhookOptions,
}

/// Webhook as returned by the API. Never carries the secret.
#[derive(Debug, Serialize)]
pub struct WebhookView {
    /// Identifier
    pub id: WebhookId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Target URL
    pub url: String,
    /// Subscribed event names
    pub events: Vec<String>,
    /// Custom headers
    pub headers: HashMap<String, String>,
    /// Payload filters
    pub filters: serde_json::Value,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Request deadline in milliseconds
    pub timeout_ms: u64,
    /// TLS verification
    pub verify_ssl: bool,
    /// Lifecycle status
    pub status: WebhookStatus,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Attempts executed
    pub total_attempts: u64,
    /// Attempts answered with 2xx
    pub successful_attempts: u64,
    /// Attempts that failed
    pub failed_attempts: u64,
    /// Most recent success
    pub last_success_at: Option<DateTime<Utc>>,
    /// Most recent failure
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl From<Webhook> for WebhookView {
    fn from(webhook: Webhook) -> Self {
        Self {
            id: webhook.id,
            tenant_id: webhook.tenant_id,
            url: webhook.url,
            events: webhook.events,
            headers: webhook.headers,
            filters: webhook.filters,
            max_retries: webhook.max_retries,
            timeout_ms: webhook.timeout_ms,
            verify_ssl: webhook.verify_ssl,
            status: webhook.status,
            consecutive_failures: webhook.consecutive_failures,
            total_attempts: webhook.total_attempts,
            successful_attempts: webhook.successful_attempts,
            failed_attempts: webhook.failed_attempts,
            last_success_at: webhook.last_success_at,
            last_failure_at: webhook.last_failure_at,
            created_at: webhook.created_at,
            updated_at: webhook.updated_at,
        }
    }
}

/// Registration response. The secret is shown only here.
#[derive(Debug, Serialize)]
pub struct RegisteredWebhook {
    /// Stored webhook
    #[serde(flatten)]
    pub webhook: WebhookView,
    /// Signing secret
    pub secret: String,
}

/// Registers a webhook for a tenant.
#[instrument(name = "register_webhook", skip(state, request), fields(tenant_id = %tenant_id))]
pub async fn register_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(request): Json<RegisterWebhookRequest>,
) -> Result<(StatusCode, Json<RegisteredWebhook>)> {
    let webhook = state
        .registry
        .register(
            TenantId::from(tenant_id),
            &request.url,
            request.events,
            request.secret,
            request.options,
        )
        .await?;

    info!(webhook_id = %webhook.id, "webhook registered via api");

    let secret = webhook.secret.clone();
    Ok((StatusCode::CREATED, Json(RegisteredWebhook { webhook: webhook.into(), secret })))
}

/// Lists a tenant's webhooks.
#[instrument(name = "list_webhooks", skip(state), fields(tenant_id = %tenant_id))]
pub async fn list_webhooks(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<WebhookView>>> {
    let webhooks = state.registry.list(TenantId::from(tenant_id)).await?;
    Ok(Json(webhooks.into_iter().map(WebhookView::from).collect()))
}

/// Fetches one webhook.
#[instrument(name = "get_webhook", skip(state))]
pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookView>> {
    Ok(Json(state.registry.get(WebhookId::from(id)).await?.into()))
}

/// Re-activates a webhook and clears its failure streak.
#[instrument(name = "enable_webhook", skip(state))]
pub async fn enable_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookView>> {
    Ok(Json(state.registry.enable(WebhookId::from(id)).await?.into()))
}

/// Stops deliveries to a webhook.
#[instrument(name = "disable_webhook", skip(state))]
pub async fn disable_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookView>> {
    Ok(Json(state.registry.disable(WebhookId::from(id)).await?.into()))
}

/// Query string for attempt history.
#[derive(Debug, Default, Deserialize)]
pub struct AttemptQuery {
    /// Maximum rows, newest first
    pub limit: Option<usize>,
}

/// One delivery attempt, without the payload snapshot.
#[derive(Debug, Serialize)]
pub struct AttemptView {
    /// Identifier
    pub id: AttemptId,
    /// Event occurrence
    pub event_id: EventId,
    /// Event name
    pub event: String,
    /// Target URL
    pub url: String,
    /// Lifecycle status
    pub status: AttemptStatus,
    /// 0 for the first attempt
    pub attempt_number: u32,
    /// Response status, if any
    pub http_status: Option<u16>,
    /// Failure description
    pub error_message: Option<String>,
    /// HTTP exchange time
    pub duration_ms: Option<u64>,
    /// Earliest claim time
    pub scheduled_at: DateTime<Utc>,
    /// Successor due time
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Chain ended without a successor
    pub exhausted: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Execution end
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<WebhookAttempt> for AttemptView {
    fn from(attempt: WebhookAttempt) -> Self {
        Self {
            id: attempt.id,
            event_id: attempt.event_id,
            event: attempt.event,
            url: attempt.url,
            status: attempt.status,
            attempt_number: attempt.attempt_number,
            http_status: attempt.http_status,
            error_message: attempt.error_message,
            duration_ms: attempt.duration_ms,
            scheduled_at: attempt.scheduled_at,
            next_retry_at: attempt.next_retry_at,
            exhausted: attempt.exhausted,
            created_at: attempt.created_at,
            completed_at: attempt.completed_at,
        }
    }
}

/// Delivery history for a webhook.
#[instrument(name = "list_attempts", skip(state))]
pub async fn list_attempts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AttemptQuery>,
) -> Result<Json<Vec<AttemptView>>> {
    let webhook_id = WebhookId::from(id);
    state.registry.get(webhook_id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_ATTEMPT_LIMIT).clamp(1, MAX_ATTEMPT_LIMIT);
    let attempts = state.storage.find_attempts_by_webhook(webhook_id, limit).await?;
    Ok(Json(attempts.into_iter().map(AttemptView::from).collect()))
}
