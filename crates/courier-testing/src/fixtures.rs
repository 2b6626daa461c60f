//! Test data builders with sensible defaults.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use courier_core::models::{TenantId, Webhook, WebhookId, WebhookStatus};
use serde_json::Value;

/// Builder for webhooks inserted directly into storage, bypassing
/// registration validation.
#[derive(Debug, Clone)]
pub struct WebhookBuilder {
    tenant_id: TenantId,
    url: String,
    events: Vec<String>,
    secret: String,
    headers: HashMap<String, String>,
    filters: Value,
    max_retries: u32,
    timeout_ms: u64,
    status: WebhookStatus,
    consecutive_failures: u32,
    created_at: Option<DateTime<Utc>>,
}

impl WebhookBuilder {
    /// Active webhook for `url` subscribed to `order.paid`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            tenant_id: TenantId::new(),
            url: url.into(),
            events: vec!["order.paid".to_string()],
            secret: "whsec_test_secret".to_string(),
            headers: HashMap::new(),
            filters: Value::Object(serde_json::Map::new()),
            max_retries: 3,
            timeout_ms: 5_000,
            status: WebhookStatus::Active,
            consecutive_failures: 0,
            created_at: None,
        }
    }

    /// Sets the owning tenant.
    #[must_use]
    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Replaces the subscribed events.
    #[must_use]
    pub fn events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the signing secret.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the payload filters.
    #[must_use]
    pub fn filters(mut self, filters: Value) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the lifecycle status.
    #[must_use]
    pub fn status(mut self, status: WebhookStatus) -> Self {
        self.status = status;
        self
    }

    /// Starts the webhook with an existing failure streak.
    #[must_use]
    pub fn consecutive_failures(mut self, failures: u32) -> Self {
        self.consecutive_failures = failures;
        self
    }

    /// Sets the creation time. Defaults to the current wall time.
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the webhook.
    pub fn build(self) -> Webhook {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Webhook {
            id: WebhookId::new(),
            tenant_id: self.tenant_id,
            url: self.url,
            events: self.events,
            secret: self.secret,
            headers: self.headers,
            filters: self.filters,
            max_retries: self.max_retries,
            timeout_ms: self.timeout_ms,
            verify_ssl: true,
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            consecutive_failures: self.consecutive_failures,
            status: self.status,
            last_success_at: None,
            last_failure_at: None,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Sample event payloads.
pub mod payloads {
    use serde_json::{json, Value};

    /// Payload for `order.paid`.
    pub fn order_paid(order_id: &str, amount_cents: u64) -> Value {
        json!({
            "order": {
                "id": order_id,
                "amount_cents": amount_cents,
                "currency": "USD",
            },
            "status": "paid",
        })
    }

    /// Payload for `contact.created`.
    pub fn contact_created(email: &str) -> Value {
        json!({
            "contact": {
                "email": email,
                "source": "form",
            },
        })
    }

    /// Payload for `form.submitted` with a form identifier to filter on.
    pub fn form_submitted(form_id: &str) -> Value {
        json!({
            "form_id": form_id,
            "fields": { "name": "Ada" },
        })
    }
}
