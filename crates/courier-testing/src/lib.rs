//! Test infrastructure for deterministic delivery testing.
//!
//! Wires the production registry, dispatcher and delivery engine to
//! in-memory storage, a manually driven clock and a local HTTP receiver, so
//! integration tests exercise the same code paths that run in production
//! without a database.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use courier_delivery::{
    storage::mock::MockDeliveryStorage, DeliveryEngine, Dispatcher, WebhookRegistry,
};

pub mod events;
pub mod fixtures;
pub mod http;
pub mod invariants;

mod delivery;
mod env_core;

pub use courier_core::{
    models::{AttemptStatus, EventId, TenantId, Webhook, WebhookAttempt, WebhookId, WebhookStatus},
    Clock, TestClock,
};
pub use env_core::TestEnvBuilder;
pub use events::RecordingEventHandler;
pub use fixtures::{payloads, WebhookBuilder};
pub use http::{MockResponse, MockServer};

/// Test environment for delivery integration tests.
///
/// Provides:
/// - In-memory delivery storage with inspection helpers
/// - A local HTTP receiver standing in for tenant endpoints
/// - Deterministic time control shared with the engine
/// - The production registry, dispatcher and engine
/// - A recorder of every delivery event
pub struct TestEnv {
    /// HTTP receiver that webhooks point at.
    pub http_mock: MockServer,
    /// Clock shared with every component of this environment.
    pub clock: TestClock,
    storage: Arc<MockDeliveryStorage>,
    registry: Arc<WebhookRegistry>,
    dispatcher: Arc<Dispatcher>,
    engine: DeliveryEngine,
    events: Arc<RecordingEventHandler>,
}
