//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhook subscriptions, delivery attempts, and newtype ID wrappers
//! for compile-time type safety. Includes database serialization traits and
//! the state vocabulary of the delivery pipeline.

use std::{collections::HashMap, fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed tenant identifier.
///
/// Every webhook and attempt is scoped to exactly one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Creates a new random tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for TenantId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TenantId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for TenantId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed webhook subscription identifier.
///
/// # Example
///
/// ```
/// use courier_core::models::WebhookId;
/// let webhook_id = WebhookId::new();
/// println!("Delivering to webhook {}", webhook_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    /// Creates a new random webhook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WebhookId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for WebhookId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for WebhookId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for WebhookId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed event occurrence identifier.
///
/// One platform event fanned out to several webhooks shares a single
/// `EventId`, and every attempt in a retry chain carries it. Receivers see
/// it as `X-Webhook-Id` and can use it for idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed delivery attempt identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    /// Creates a new random attempt ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AttemptId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for AttemptId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AttemptId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for AttemptId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Webhook subscription status.
///
/// ```text
/// Active <-> Disabled        (manual)
/// Active  -> Failed          (consecutive failure threshold reached)
/// Failed  -> Active          (manual re-enable)
/// ```
///
/// Only `Active` webhooks receive new attempts or have pending attempts
/// claimed by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    /// Receiving deliveries.
    Active,

    /// Paused by an operator.
    Disabled,

    /// Paused automatically after too many consecutive failures.
    Failed,
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for WebhookStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for WebhookStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid webhook status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for WebhookStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Delivery attempt lifecycle status.
///
/// ```text
/// Pending -> Delivering -> Success
///                       -> Failed (may spawn a Pending successor)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    /// Waiting for `scheduled_at` and a free worker.
    Pending,

    /// Claimed by a worker, HTTP request in flight.
    ///
    /// At most one attempt per webhook is in this state.
    Delivering,

    /// Endpoint answered with a 2xx status. Terminal.
    Success,

    /// Delivery failed. Terminal for this row; the chain may continue
    /// through a successor attempt.
    Failed,
}

impl AttemptStatus {
    /// Whether the attempt has finished executing.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Delivering => write!(f, "delivering"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for AttemptStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AttemptStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "delivering" => Ok(Self::Delivering),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid attempt status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for AttemptStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Tenant-configured webhook subscription.
///
/// Holds delivery configuration and rolling health counters. Counters are
/// only ever changed through a single storage operation per attempt so that
/// `total_attempts == successful_attempts + failed_attempts` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique identifier for this webhook.
    pub id: WebhookId,

    /// Tenant that owns this webhook.
    pub tenant_id: TenantId,

    /// Target URL. HTTPS unless the registry allows insecure URLs.
    pub url: String,

    /// Subscribed event names.
    pub events: Vec<String>,

    /// Shared secret used to sign payloads.
    pub secret: String,

    /// Custom headers sent with every delivery.
    pub headers: HashMap<String, String>,

    /// Top-level payload equality filters. `Null` or an empty object
    /// matches every payload.
    pub filters: serde_json::Value,

    /// Retries after the initial attempt.
    pub max_retries: u32,

    /// Per-request deadline in milliseconds.
    pub timeout_ms: u64,

    /// Whether to verify the endpoint's TLS certificate.
    pub verify_ssl: bool,

    /// Attempts executed so far.
    pub total_attempts: u64,

    /// Attempts that received a 2xx response.
    pub successful_attempts: u64,

    /// Attempts that failed for any reason.
    pub failed_attempts: u64,

    /// Failures since the last success.
    pub consecutive_failures: u32,

    /// Current subscription status.
    pub status: WebhookStatus,

    /// Completion time of the most recent successful attempt.
    pub last_success_at: Option<DateTime<Utc>>,

    /// Completion time of the most recent failed attempt.
    pub last_failure_at: Option<DateTime<Utc>>,

    /// When this webhook was registered.
    pub created_at: DateTime<Utc>,

    /// When configuration or status last changed.
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Whether workers may deliver to this webhook.
    pub fn is_active(&self) -> bool {
        self.status == WebhookStatus::Active
    }

    /// Whether this webhook subscribes to `event`.
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    /// Request deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Checks the payload against this webhook's filters.
    ///
    /// Every filter key must exist at the top level of `payload` with an
    /// equal JSON value.
    pub fn matches_filters(&self, payload: &serde_json::Value) -> bool {
        match &self.filters {
            serde_json::Value::Object(filters) => filters
                .iter()
                .all(|(key, expected)| payload.get(key).is_some_and(|actual| actual == expected)),
            _ => true,
        }
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Webhook {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let headers: sqlx::types::Json<HashMap<String, String>> = row.try_get("headers")?;

        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            url: row.try_get("url")?,
            events: row.try_get("events")?,
            secret: row.try_get("secret")?,
            headers: headers.0,
            filters: row.try_get("filters")?,
            max_retries: non_negative(row, "max_retries")?,
            timeout_ms: non_negative_i64(row, "timeout_ms")?,
            verify_ssl: row.try_get("verify_ssl")?,
            total_attempts: non_negative_i64(row, "total_attempts")?,
            successful_attempts: non_negative_i64(row, "successful_attempts")?,
            failed_attempts: non_negative_i64(row, "failed_attempts")?,
            consecutive_failures: non_negative(row, "consecutive_failures")?,
            status: row.try_get("status")?,
            last_success_at: row.try_get("last_success_at")?,
            last_failure_at: row.try_get("last_failure_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One delivery try of an event occurrence to a webhook.
///
/// Attempt rows are numbered from 0 (the initial attempt) up to the
/// webhook's `max_retries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAttempt {
    /// Unique identifier for this attempt.
    pub id: AttemptId,

    /// Webhook being delivered to.
    pub webhook_id: WebhookId,

    /// Owning tenant, copied from the webhook.
    pub tenant_id: TenantId,

    /// Event occurrence shared by the whole retry chain.
    pub event_id: EventId,

    /// Event name.
    pub event: String,

    /// Payload snapshot taken at dispatch time.
    pub payload: serde_json::Value,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// Target URL snapshot.
    pub url: String,

    /// Lifecycle status.
    pub status: AttemptStatus,

    /// 0 for the initial attempt, incremented per retry.
    pub attempt_number: u32,

    /// HTTP status code, if the endpoint responded.
    pub http_status: Option<u16>,

    /// Response body, truncated to the client's limit.
    pub response_body: Option<String>,

    /// Response headers.
    pub response_headers: Option<HashMap<String, String>>,

    /// Failure description.
    pub error_message: Option<String>,

    /// Wall time of the HTTP exchange.
    pub duration_ms: Option<u64>,

    /// Earliest time a worker may claim this attempt.
    pub scheduled_at: DateTime<Utc>,

    /// Successor's scheduled time, set when this failed attempt was retried.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Set on the failed attempt that ends its chain without a successor.
    pub exhausted: bool,

    /// When a worker claimed the attempt.
    pub claimed_at: Option<DateTime<Utc>>,

    /// When the attempt row was created.
    pub created_at: DateTime<Utc>,

    /// When execution finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookAttempt {
    /// Creates a pending attempt due at `scheduled_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        webhook: &Webhook,
        event_id: EventId,
        event: impl Into<String>,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
        attempt_number: u32,
        scheduled_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            webhook_id: webhook.id,
            tenant_id: webhook.tenant_id,
            event_id,
            event: event.into(),
            payload,
            occurred_at,
            url: webhook.url.clone(),
            status: AttemptStatus::Pending,
            attempt_number,
            http_status: None,
            response_body: None,
            response_headers: None,
            error_message: None,
            duration_ms: None,
            scheduled_at,
            next_retry_at: None,
            exhausted: false,
            claimed_at: None,
            created_at,
            completed_at: None,
        }
    }

    /// Builds the next attempt in this chain.
    ///
    /// The successor keeps the event occurrence and payload snapshot but
    /// targets the webhook's current URL.
    pub fn successor(&self, url: &str, scheduled_at: DateTime<Utc>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: AttemptId::new(),
            webhook_id: self.webhook_id,
            tenant_id: self.tenant_id,
            event_id: self.event_id,
            event: self.event.clone(),
            payload: self.payload.clone(),
            occurred_at: self.occurred_at,
            url: url.to_string(),
            status: AttemptStatus::Pending,
            attempt_number: self.attempt_number + 1,
            http_status: None,
            response_body: None,
            response_headers: None,
            error_message: None,
            duration_ms: None,
            scheduled_at,
            next_retry_at: None,
            exhausted: false,
            claimed_at: None,
            created_at,
            completed_at: None,
        }
    }

    /// Applies a completion record to this attempt.
    pub fn apply(&mut self, completion: &AttemptCompletion) {
        self.status = completion.status;
        self.http_status = completion.http_status;
        self.response_body.clone_from(&completion.response_body);
        self.response_headers.clone_from(&completion.response_headers);
        self.error_message.clone_from(&completion.error_message);
        self.duration_ms = completion.duration_ms;
        self.next_retry_at = completion.next_retry_at;
        self.exhausted = completion.exhausted;
        self.completed_at = Some(completion.completed_at);
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for WebhookAttempt {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let response_headers: Option<sqlx::types::Json<HashMap<String, String>>> =
            row.try_get("response_headers")?;
        let http_status: Option<i32> = row.try_get("http_status")?;
        let duration_ms: Option<i64> = row.try_get("duration_ms")?;

        Ok(Self {
            id: row.try_get("id")?,
            webhook_id: row.try_get("webhook_id")?,
            tenant_id: row.try_get("tenant_id")?,
            event_id: row.try_get("event_id")?,
            event: row.try_get("event")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            url: row.try_get("url")?,
            status: row.try_get("status")?,
            attempt_number: non_negative(row, "attempt_number")?,
            http_status: http_status
                .map(u16::try_from)
                .transpose()
                .map_err(|_| sqlx::Error::Decode("http_status out of range".into()))?,
            response_body: row.try_get("response_body")?,
            response_headers: response_headers.map(|h| h.0),
            error_message: row.try_get("error_message")?,
            duration_ms: duration_ms
                .map(u64::try_from)
                .transpose()
                .map_err(|_| sqlx::Error::Decode("duration_ms cannot be negative".into()))?,
            scheduled_at: row.try_get("scheduled_at")?,
            next_retry_at: row.try_get("next_retry_at")?,
            exhausted: row.try_get("exhausted")?,
            claimed_at: row.try_get("claimed_at")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Outcome of executing an attempt, written back in one storage operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptCompletion {
    /// `Success` or `Failed`.
    pub status: AttemptStatus,
    /// HTTP status code, if any response arrived.
    pub http_status: Option<u16>,
    /// Truncated response body.
    pub response_body: Option<String>,
    /// Response headers.
    pub response_headers: Option<HashMap<String, String>>,
    /// Failure description.
    pub error_message: Option<String>,
    /// Wall time of the exchange.
    pub duration_ms: Option<u64>,
    /// When execution finished.
    pub completed_at: DateTime<Utc>,
    /// Successor's scheduled time when a retry was enqueued.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Whether this attempt ends the chain without success.
    pub exhausted: bool,
}

/// Webhook health after an attempt outcome was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookHealth {
    /// Status after applying the failure threshold.
    pub status: WebhookStatus,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// True when this outcome moved the webhook from `Active` to `Failed`.
    pub tripped: bool,
}

fn non_negative(row: &PgRow, column: &str) -> Result<u32, sqlx::Error> {
    use sqlx::Row;

    let value: i32 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| sqlx::Error::Decode(format!("{column} cannot be negative").into()))
}

fn non_negative_i64(row: &PgRow, column: &str) -> Result<u64, sqlx::Error> {
    use sqlx::Row;

    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|_| sqlx::Error::Decode(format!("{column} cannot be negative").into()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn webhook_with_filters(filters: serde_json::Value) -> Webhook {
        let now = Utc::now();
        Webhook {
            id: WebhookId::new(),
            tenant_id: TenantId::new(),
            url: "https://example.com/hooks".to_string(),
            events: vec!["order.paid".to_string(), "order.refunded".to_string()],
            secret: "whsec_test".to_string(),
            headers: HashMap::new(),
            filters,
            max_retries: 3,
            timeout_ms: 30_000,
            verify_ssl: true,
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            consecutive_failures: 0,
            status: WebhookStatus::Active,
            last_success_at: None,
            last_failure_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_display_matches_database_values() {
        assert_eq!(WebhookStatus::Active.to_string(), "active");
        assert_eq!(WebhookStatus::Disabled.to_string(), "disabled");
        assert_eq!(WebhookStatus::Failed.to_string(), "failed");
        assert_eq!(AttemptStatus::Pending.to_string(), "pending");
        assert_eq!(AttemptStatus::Delivering.to_string(), "delivering");
        assert_eq!(AttemptStatus::Success.to_string(), "success");
        assert_eq!(AttemptStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn only_success_and_failed_are_terminal() {
        assert!(!AttemptStatus::Pending.is_terminal());
        assert!(!AttemptStatus::Delivering.is_terminal());
        assert!(AttemptStatus::Success.is_terminal());
        assert!(AttemptStatus::Failed.is_terminal());
    }

    #[test]
    fn subscription_matches_exact_event_names() {
        let webhook = webhook_with_filters(serde_json::Value::Null);

        assert!(webhook.subscribes_to("order.paid"));
        assert!(!webhook.subscribes_to("order"));
        assert!(!webhook.subscribes_to("contact.created"));
    }

    #[test]
    fn empty_filters_match_everything() {
        let null = webhook_with_filters(serde_json::Value::Null);
        let empty = webhook_with_filters(json!({}));
        let payload = json!({"currency": "USD"});

        assert!(null.matches_filters(&payload));
        assert!(empty.matches_filters(&payload));
    }

    #[test]
    fn filters_require_every_key_to_match() {
        let webhook = webhook_with_filters(json!({"currency": "USD", "funnel_id": 42}));

        assert!(webhook.matches_filters(&json!({"currency": "USD", "funnel_id": 42, "x": 1})));
        assert!(!webhook.matches_filters(&json!({"currency": "USD"})));
        assert!(!webhook.matches_filters(&json!({"currency": "EUR", "funnel_id": 42})));
    }

    #[test]
    fn successor_keeps_occurrence_and_increments_number() {
        let webhook = webhook_with_filters(serde_json::Value::Null);
        let now = Utc::now();
        let first = WebhookAttempt::pending(
            &webhook,
            EventId::new(),
            "order.paid",
            json!({"amount": 10}),
            now,
            0,
            now,
            now,
        );

        let later = now + chrono::Duration::seconds(30);
        let next = first.successor(&webhook.url, later, now);

        assert_ne!(next.id, first.id);
        assert_eq!(next.event_id, first.event_id);
        assert_eq!(next.attempt_number, 1);
        assert_eq!(next.payload, first.payload);
        assert_eq!(next.occurred_at, first.occurred_at);
        assert_eq!(next.scheduled_at, later);
        assert_eq!(next.status, AttemptStatus::Pending);
    }
}
