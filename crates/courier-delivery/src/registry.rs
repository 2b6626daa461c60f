//! Tenant-scoped webhook subscriptions.
//!
//! Validates registrations against the event catalog and URL policy, and
//! owns the manual status transitions. The automatic `active -> failed`
//! transition happens in storage when the executor records an outcome, using
//! the threshold in [`FailurePolicy`].

use std::{collections::HashMap, sync::Arc};

use courier_core::{
    models::{TenantId, Webhook, WebhookId, WebhookStatus},
    Clock, CoreError, EventCatalog,
};
use reqwest::{
    header::{HeaderName, HeaderValue},
    Url,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{client::is_managed_header, signer, storage::DeliveryStorage};

/// Registration and lookup failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// URL did not parse.
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),

    /// URL scheme is not allowed.
    #[error("webhook url must use https, got {0}")]
    InsecureUrl(String),

    /// No events were given.
    #[error("at least one event is required")]
    NoEvents,

    /// Some event names are not in the catalog.
    #[error("unknown events: {}", .0.join(", "))]
    UnknownEvents(Vec<String>),

    /// An explicit secret was empty.
    #[error("secret must not be empty")]
    EmptySecret,

    /// A custom header is malformed or reserved.
    #[error("invalid header {0}")]
    InvalidHeader(String),

    /// Filters must be a JSON object.
    #[error("filters must be a JSON object")]
    InvalidFilters,

    /// Timeout outside the allowed range.
    #[error("timeout_ms must be between 1 and {max}, got {value}")]
    InvalidTimeout {
        /// Requested timeout
        value: u64,
        /// Largest allowed timeout
        max: u64,
    },

    /// Retry budget above the allowed maximum.
    #[error("max_retries must be at most {max}, got {value}")]
    TooManyRetries {
        /// Requested retry budget
        value: u32,
        /// Largest allowed budget
        max: u32,
    },

    /// Webhook does not exist.
    #[error("webhook {0} not found")]
    NotFound(WebhookId),

    /// Storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Consecutive failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Consecutive failed attempts that move an active webhook to `failed`.
    /// Zero disables the transition.
    pub threshold: u32,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self { threshold: 5 }
    }
}

/// Validation limits and defaults for registrations.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Accept `http://` URLs. Intended for local development and tests.
    pub allow_insecure_urls: bool,
    /// Known event names.
    pub catalog: EventCatalog,
    /// Retry budget when the registration does not set one.
    pub default_max_retries: u32,
    /// Largest accepted retry budget.
    pub max_retries_limit: u32,
    /// Timeout when the registration does not set one.
    pub default_timeout_ms: u64,
    /// Largest accepted timeout.
    pub max_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            allow_insecure_urls: false,
            catalog: EventCatalog::default(),
            default_max_retries: 3,
            max_retries_limit: 20,
            default_timeout_ms: 30_000,
            max_timeout_ms: 120_000,
        }
    }
}

/// Optional per-webhook delivery settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookOptions {
    /// Custom headers sent with every delivery.
    pub headers: HashMap<String, String>,
    /// Top-level payload equality filters.
    pub filters: Option<serde_json::Value>,
    /// Retries after the initial attempt.
    pub max_retries: Option<u32>,
    /// Request deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Whether to verify TLS certificates.
    pub verify_ssl: Option<bool>,
}

/// Webhook subscription registry.
pub struct WebhookRegistry {
    storage: Arc<dyn DeliveryStorage>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
}

impl WebhookRegistry {
    /// Creates a registry over `storage`.
    pub fn new(storage: Arc<dyn DeliveryStorage>, clock: Arc<dyn Clock>, config: RegistryConfig) -> Self {
        Self { storage, clock, config }
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registers a new active webhook.
    ///
    /// Generates a secret when `secret` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad input, or `Storage` if the insert
    /// fails.
    pub async fn register(
        &self,
        tenant_id: TenantId,
        url: &str,
        events: Vec<String>,
        secret: Option<String>,
        options: WebhookOptions,
    ) -> Result<Webhook> {
        let url = self.validate_url(url)?;
        let events = self.validate_events(events)?;
        let secret = match secret {
            Some(secret) if secret.is_empty() => return Err(RegistryError::EmptySecret),
            Some(secret) => secret,
            None => signer::generate_secret(),
        };
        validate_headers(&options.headers)?;

        let filters = match options.filters {
            None | Some(serde_json::Value::Null) => serde_json::Value::Object(Default::default()),
            Some(filters @ serde_json::Value::Object(_)) => filters,
            Some(_) => return Err(RegistryError::InvalidFilters),
        };

        let timeout_ms = options.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        if timeout_ms == 0 || timeout_ms > self.config.max_timeout_ms {
            return Err(RegistryError::InvalidTimeout {
                value: timeout_ms,
                max: self.config.max_timeout_ms,
            });
        }

        let max_retries = options.max_retries.unwrap_or(self.config.default_max_retries);
        if max_retries > self.config.max_retries_limit {
            return Err(RegistryError::TooManyRetries {
                value: max_retries,
                max: self.config.max_retries_limit,
            });
        }

        let now = self.clock.now_utc();
        let webhook = Webhook {
            id: WebhookId::new(),
            tenant_id,
            url,
            events,
            secret,
            headers: options.headers,
            filters,
            max_retries,
            timeout_ms,
            verify_ssl: options.verify_ssl.unwrap_or(true),
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            consecutive_failures: 0,
            status: WebhookStatus::Active,
            last_success_at: None,
            last_failure_at: None,
            created_at: now,
            updated_at: now,
        };

        self.storage.create_webhook(webhook.clone()).await?;

        info!(
            webhook_id = %webhook.id,
            tenant_id = %tenant_id,
            events = webhook.events.len(),
            "webhook registered"
        );

        Ok(webhook)
    }

    /// Activates a webhook and clears its failure streak. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown webhooks.
    pub async fn enable(&self, webhook_id: WebhookId) -> Result<Webhook> {
        let webhook = self.set_status(webhook_id, WebhookStatus::Active).await?;
        info!(webhook_id = %webhook_id, "webhook enabled");
        Ok(webhook)
    }

    /// Stops deliveries to a webhook. Idempotent.
    ///
    /// Pending attempts stay queued until the webhook is enabled again.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown webhooks.
    pub async fn disable(&self, webhook_id: WebhookId) -> Result<Webhook> {
        let webhook = self.set_status(webhook_id, WebhookStatus::Disabled).await?;
        info!(webhook_id = %webhook_id, "webhook disabled");
        Ok(webhook)
    }

    /// Looks up a webhook.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown webhooks.
    pub async fn get(&self, webhook_id: WebhookId) -> Result<Webhook> {
        self.storage.find_webhook(webhook_id).await?.ok_or(RegistryError::NotFound(webhook_id))
    }

    /// Lists a tenant's webhooks, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the query fails.
    pub async fn list(&self, tenant_id: TenantId) -> Result<Vec<Webhook>> {
        Ok(self.storage.list_webhooks(tenant_id).await?)
    }

    async fn set_status(&self, webhook_id: WebhookId, status: WebhookStatus) -> Result<Webhook> {
        match self.storage.set_webhook_status(webhook_id, status, self.clock.now_utc()).await {
            Err(e) if e.is_not_found() => Err(RegistryError::NotFound(webhook_id)),
            other => Ok(other?),
        }
    }

    fn validate_url(&self, raw: &str) -> Result<String> {
        let url = Url::parse(raw.trim()).map_err(|e| RegistryError::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "https" => {},
            "http" if self.config.allow_insecure_urls => {},
            scheme => return Err(RegistryError::InsecureUrl(scheme.to_string())),
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RegistryError::InvalidUrl("missing host".to_string()));
        }

        Ok(url.to_string())
    }

    fn validate_events(&self, events: Vec<String>) -> Result<Vec<String>> {
        let mut events: Vec<String> = events.into_iter().map(|e| e.trim().to_string()).collect();
        events.sort();
        events.dedup();
        events.retain(|e| !e.is_empty());

        if events.is_empty() {
            return Err(RegistryError::NoEvents);
        }

        let unknown = self.config.catalog.unknown(&events);
        if !unknown.is_empty() {
            return Err(RegistryError::UnknownEvents(unknown.into_iter().map(String::from).collect()));
        }

        Ok(events)
    }
}

fn validate_headers(headers: &HashMap<String, String>) -> Result<()> {
    for (name, value) in headers {
        if is_managed_header(name) {
            return Err(RegistryError::InvalidHeader(format!("{name} is reserved")));
        }
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RegistryError::InvalidHeader(format!("{name} is not a valid name")))?;
        HeaderValue::from_str(value)
            .map_err(|_| RegistryError::InvalidHeader(format!("{name} has an invalid value")))?;
    }
    Ok(())
}
