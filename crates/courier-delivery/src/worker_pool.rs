//! Worker pool management with structured concurrency.
//!
//! Spawns supervised delivery workers and shuts them down gracefully.

use std::{sync::Arc, time::Duration};

use courier_core::Clock;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    engine::{DeliveryConfig, EngineStats},
    error::{DeliveryError, Result},
    executor::AttemptExecutor,
    storage::DeliveryStorage,
    worker::DeliveryWorker,
};

/// Supervised set of delivery worker tasks.
pub struct WorkerPool {
    storage: Arc<dyn DeliveryStorage>,
    executor: Arc<AttemptExecutor>,
    config: DeliveryConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Create a new worker pool with the given configuration.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        executor: Arc<AttemptExecutor>,
        config: DeliveryConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            executor,
            config,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
            clock,
        }
    }

    /// Spawns `worker_count` workers. Returns once they are running.
    pub async fn spawn_workers(&mut self) {
        info!(worker_count = self.config.worker_count, "spawning delivery workers");

        self.stats.write().await.active_workers = self.config.worker_count;

        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.storage.clone(),
                self.executor.clone(),
                self.config.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );

            self.worker_handles.push(tokio::spawn(async move { worker.run().await }));
        }

        info!(spawned_workers = self.worker_handles.len(), "delivery workers spawned");
    }

    /// Cancels all workers and waits for in-flight deliveries to finish.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers are still running after
    /// `timeout`, or `WorkerPanic` if a worker panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let stats = self.stats.clone();
        let shutdown_future = async move {
            let mut first_panic = None;

            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                    first_panic.get_or_insert(DeliveryError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }

            stats.write().await.active_workers = 0;
            first_panic
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            },
        }
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active_count,
                "worker pool dropped without graceful shutdown, cancelling workers"
            );
            self.cancellation_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{NoOpEventHandler, TestClock};

    use super::*;
    use crate::{
        client::DeliveryClient, registry::FailurePolicy, retry::RetryPolicy,
        storage::mock::MockDeliveryStorage,
    };

    fn pool(worker_count: usize) -> (WorkerPool, CancellationToken, Arc<RwLock<EngineStats>>) {
        let storage: Arc<dyn DeliveryStorage> = Arc::new(MockDeliveryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let executor = Arc::new(AttemptExecutor::new(
            storage.clone(),
            Arc::new(DeliveryClient::with_defaults().unwrap()),
            RetryPolicy::default(),
            FailurePolicy::default(),
            clock.clone(),
            Arc::new(NoOpEventHandler),
        ));
        let config = DeliveryConfig {
            worker_count,
            poll_interval: Duration::from_millis(10),
            ..DeliveryConfig::default()
        };
        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let token = CancellationToken::new();

        let pool = WorkerPool::new(storage, executor, config, stats.clone(), token.clone(), clock);
        (pool, token, stats)
    }

    #[tokio::test]
    async fn spawns_configured_workers() {
        let (mut pool, _token, stats) = pool(3);

        pool.spawn_workers().await;

        assert_eq!(pool.worker_handles.len(), 3);
        assert!(pool.has_active_workers());
        assert_eq!(stats.read().await.active_workers, 3);

        pool.shutdown_graceful(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn graceful_shutdown_stops_every_worker() {
        let (mut pool, token, stats) = pool(2);
        pool.spawn_workers().await;

        pool.shutdown_graceful(Duration::from_secs(5)).await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(stats.read().await.active_workers, 0);
    }

    #[tokio::test]
    async fn dropping_a_running_pool_cancels_workers() {
        let (mut pool, token, _stats) = pool(1);
        pool.spawn_workers().await;

        drop(pool);

        assert!(token.is_cancelled());
    }
}
