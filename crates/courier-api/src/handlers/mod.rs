//! HTTP request handlers for the Courier API.
//!
//! Handlers are grouped by resource:
//! - `health` - health, readiness and liveness probes
//! - `webhooks` - registration, lookup, enable/disable, attempt history
//! - `events` - event triggers
//!
//! Every handler returns [`crate::error::ApiError`] on failure, rendered as
//! `{"error": {"code", "message"}}`.

pub mod events;
pub mod health;
pub mod webhooks;

pub use events::dispatch_event;
pub use health::{health_check, liveness_check, readiness_check};
pub use webhooks::{
    disable_webhook, enable_webhook, get_webhook, list_attempts, list_webhooks, register_webhook,
};
