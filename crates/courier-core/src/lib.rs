//! Core domain models and shared primitives.
//!
//! Provides strongly-typed identifiers, the webhook and attempt models,
//! the event catalog, the clock abstraction, delivery events, and the
//! Postgres repositories. Every other Courier crate builds on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use catalog::EventCatalog;
pub use error::{CoreError, Result};
pub use events::{
    DeliveryEvent, DeliveryExhaustedEvent, DeliveryFailedEvent, DeliverySucceededEvent,
    EventHandler, MulticastEventHandler, NoOpEventHandler, TracingEventHandler, WebhookFailedEvent,
};
pub use models::{
    AttemptCompletion, AttemptId, AttemptStatus, EventId, TenantId, Webhook, WebhookAttempt,
    WebhookHealth, WebhookId, WebhookStatus,
};
pub use time::{Clock, RealClock, TestClock};
