//! Webhook delivery engine.
//!
//! Turns platform events into signed HTTP POSTs to tenant-registered
//! webhooks, retries transient failures with capped exponential backoff, and
//! tracks per-webhook health.
//!
//! # Architecture
//!
//! 1. **Register** - [`registry::WebhookRegistry`] validates and stores
//!    subscriptions
//! 2. **Dispatch** - [`dispatch::Dispatcher`] fans an event out as one
//!    pending attempt per matching webhook
//! 3. **Claim** - workers claim due attempts, at most one in flight per
//!    webhook
//! 4. **Execute** - [`executor::AttemptExecutor`] signs, sends, records the
//!    outcome, and enqueues a successor when the retry scheduler allows it
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{storage::Storage, NoOpEventHandler, RealClock};
//! use courier_delivery::{storage::PostgresDeliveryStorage, DeliveryConfig, DeliveryEngine};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> courier_delivery::Result<()> {
//! let storage = Arc::new(PostgresDeliveryStorage::new(Arc::new(Storage::new(pool))));
//! let mut engine = DeliveryEngine::new(
//!     storage,
//!     DeliveryConfig::default(),
//!     Arc::new(RealClock::new()),
//!     Arc::new(NoOpEventHandler),
//! )?;
//!
//! engine.start().await?;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod retry;
pub mod signer;
pub mod storage;
mod worker;
mod worker_pool;

pub use dispatch::{DispatchReport, Dispatcher};
pub use engine::{DeliveryConfig, DeliveryEngine, EngineStats};
pub use error::{DeliveryError, Result};
pub use executor::{AttemptExecutor, AttemptOutcome};
pub use registry::{FailurePolicy, RegistryConfig, RegistryError, WebhookOptions, WebhookRegistry};
pub use retry::{BackoffStrategy, RetryPolicy};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default number of attempts claimed per poll.
pub const DEFAULT_BATCH_SIZE: usize = 10;
