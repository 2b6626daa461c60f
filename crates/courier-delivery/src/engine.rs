//! Webhook delivery engine.
//!
//! ```text
//! ┌────────────────┐   ┌──────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │ DeliveryEngine │──▶│ WorkerPool   │──▶│ AttemptExecutor  │──▶│ HTTP Client │
//! └────────────────┘   └──────────────┘   └──────────────────┘   └─────────────┘
//!                             │                    │
//!                             ▼                    ▼
//!                      ┌──────────────────────────────┐
//!                      │ DeliveryStorage (claim/complete) │
//!                      └──────────────────────────────┘
//! ```
//!
//! Workers poll storage for due attempts. A claim returns at most one attempt
//! per webhook and never one for a webhook that already has an attempt in
//! flight, so attempts for one webhook serialize while different webhooks
//! are delivered concurrently.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, EventHandler};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient},
    error::{DeliveryError, Result},
    executor::AttemptExecutor,
    registry::FailurePolicy,
    retry::RetryPolicy,
    storage::DeliveryStorage,
    worker::DeliveryWorker,
    worker_pool::WorkerPool,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Maximum attempts a worker claims per poll.
    pub batch_size: usize,

    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,

    /// Claims older than this are returned to `pending`, at startup and
    /// periodically by every worker. Must exceed the largest webhook timeout.
    pub claim_lease: Duration,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Backoff between attempts of a chain.
    pub retry_policy: RetryPolicy,

    /// Consecutive failure threshold.
    pub failure_policy: FailurePolicy,

    /// Maximum time to wait for workers to finish on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            claim_lease: Duration::from_secs(300),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Workers currently running.
    pub active_workers: usize,
    /// Attempts executed since startup.
    pub attempts_processed: u64,
    /// Attempts answered with 2xx.
    pub successful_deliveries: u64,
    /// Attempts that failed, retried or not.
    pub failed_deliveries: u64,
    /// Chains that ended without success.
    pub exhausted_chains: u64,
    /// Attempts currently being delivered.
    pub in_flight_deliveries: u64,
}

/// Coordinates delivery workers.
pub struct DeliveryEngine {
    storage: Arc<dyn DeliveryStorage>,
    config: DeliveryConfig,
    executor: Arc<AttemptExecutor>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngine {
    /// Creates an engine over `storage`, publishing outcomes to
    /// `event_handler`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the configuration is unusable or the
    /// HTTP client cannot be built.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }
        if config.batch_size == 0 {
            return Err(DeliveryError::configuration("batch_size must be at least 1"));
        }

        let client = Arc::new(DeliveryClient::new(config.client_config.clone())?);
        let executor = Arc::new(AttemptExecutor::new(
            storage.clone(),
            client,
            config.retry_policy.clone(),
            config.failure_policy,
            clock.clone(),
            event_handler,
        ));

        Ok(Self {
            storage,
            config,
            executor,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            clock,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Recovers abandoned claims and spawns the workers.
    ///
    /// Returns once workers are running. Call `shutdown()` to stop them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if abandoned claims cannot be released.
    pub async fn start(&mut self) -> Result<()> {
        if self.worker_pool.is_some() {
            warn!("delivery engine already started");
            return Ok(());
        }

        let lease = chrono::Duration::from_std(self.config.claim_lease)
            .map_err(|e| DeliveryError::configuration(format!("claim_lease out of range: {e}")))?;
        let released = self.storage.release_stale(self.clock.now_utc() - lease).await?;
        if released > 0 {
            warn!(released, "released attempts abandoned by a previous run");
        }

        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting webhook delivery engine"
        );

        let mut worker_pool = WorkerPool::new(
            self.storage.clone(),
            self.executor.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );
        worker_pool.spawn_workers().await;
        self.worker_pool = Some(worker_pool);

        info!("delivery engine started");
        Ok(())
    }

    /// Stops claiming new work and waits for in-flight deliveries.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers do not finish in time.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");

        if let Some(worker_pool) = self.worker_pool.take() {
            worker_pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        } else {
            info!("delivery engine was not started, shutdown completed immediately");
        }
        Ok(())
    }

    /// Current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Runs one claim-and-execute cycle on the calling task.
    ///
    /// Returns the number of attempts executed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if claiming fails.
    pub async fn process_batch(&self) -> Result<usize> {
        let worker = DeliveryWorker::new(
            0,
            self.storage.clone(),
            self.executor.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );

        worker.process_batch().await
    }
}
