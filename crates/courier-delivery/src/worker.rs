//! Delivery worker loop.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use courier_core::{models::WebhookAttempt, Clock};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    engine::{DeliveryConfig, EngineStats},
    error::{DeliveryError, Result},
    executor::{AttemptExecutor, AttemptOutcome},
    storage::DeliveryStorage,
};

/// Back-off after a failed poll.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Claims due attempts and runs them through the executor.
pub struct DeliveryWorker {
    id: usize,
    storage: Arc<dyn DeliveryStorage>,
    executor: Arc<AttemptExecutor>,
    config: DeliveryConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
    last_reap: Mutex<Option<DateTime<Utc>>>,
}

impl DeliveryWorker {
    /// Creates a new delivery worker.
    pub fn new(
        id: usize,
        storage: Arc<dyn DeliveryStorage>,
        executor: Arc<AttemptExecutor>,
        config: DeliveryConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            storage,
            executor,
            config,
            stats,
            cancellation_token,
            clock,
            last_reap: Mutex::new(None),
        }
    }

    /// Polls until cancelled.
    ///
    /// Poll errors are logged and retried after a pause; they never end the
    /// loop.
    pub async fn run(&self) {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let pause = match self.process_batch().await {
                Ok(0) => self.config.poll_interval,
                Ok(_) => continue,
                Err(error) => {
                    error!(worker_id = self.id, error = %error, "worker batch processing failed");
                    ERROR_BACKOFF
                },
            };

            tokio::select! {
                () = self.clock.sleep(pause) => {}
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
    }

    /// Claims one batch and executes it. Attempts in a batch belong to
    /// distinct webhooks and run concurrently.
    ///
    /// Expired claims are returned to `pending` first, at most once per half
    /// lease.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if releasing expired claims or claiming fails.
    pub async fn process_batch(&self) -> Result<usize> {
        self.reap_if_due().await?;

        let attempts = self
            .storage
            .claim_due(self.clock.now_utc(), self.config.batch_size)
            .await
            .map_err(|e| DeliveryError::storage(format!("failed to claim due attempts: {e}")))?;

        let claimed = attempts.len();
        if claimed > 0 {
            debug!(worker_id = self.id, claimed, "processing attempt batch");
        }

        join_all(attempts.into_iter().map(|attempt| self.process_attempt(attempt))).await;

        Ok(claimed)
    }

    /// Returns attempts claimed longer than the lease ago to `pending`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the release fails.
    pub async fn release_expired_claims(&self) -> Result<u64> {
        let lease = chrono::Duration::from_std(self.config.claim_lease)
            .map_err(|e| DeliveryError::configuration(format!("claim_lease out of range: {e}")))?;
        let released = self.storage.release_stale(self.clock.now_utc() - lease).await?;
        if released > 0 {
            warn!(worker_id = self.id, released, "released expired attempt claims");
        }
        Ok(released)
    }

    async fn reap_if_due(&self) -> Result<()> {
        let now = self.clock.now_utc();
        let mut last_reap = self.last_reap.lock().await;
        let due = match *last_reap {
            None => true,
            Some(at) => (now - at).to_std().is_ok_and(|since| since >= self.config.claim_lease / 2),
        };
        if due {
            self.release_expired_claims().await?;
            *last_reap = Some(now);
        }
        Ok(())
    }

    async fn process_attempt(&self, attempt: WebhookAttempt) {
        let attempt_id = attempt.id;
        self.stats.write().await.in_flight_deliveries += 1;

        let result = self.executor.execute(attempt).await;

        let mut stats = self.stats.write().await;
        stats.in_flight_deliveries -= 1;
        match result {
            Ok(AttemptOutcome::Released) => {},
            Ok(outcome) => {
                stats.attempts_processed += 1;
                match outcome {
                    AttemptOutcome::Delivered { .. } => stats.successful_deliveries += 1,
                    AttemptOutcome::Retrying { .. } => stats.failed_deliveries += 1,
                    AttemptOutcome::Exhausted { .. } => {
                        stats.failed_deliveries += 1;
                        stats.exhausted_chains += 1;
                    },
                    AttemptOutcome::Released => {},
                }
            },
            Err(error) => {
                drop(stats);
                error!(worker_id = self.id, attempt_id = %attempt_id, error = %error, "attempt processing failed");
                // Only touches the row while it is still delivering.
                if let Err(release_error) = self.storage.release_attempt(attempt_id).await {
                    warn!(
                        worker_id = self.id,
                        attempt_id = %attempt_id,
                        error = %release_error,
                        "failed to release attempt, left for claim expiry"
                    );
                }
            },
        }
    }
}
