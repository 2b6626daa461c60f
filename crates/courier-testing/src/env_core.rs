//! TestEnv construction and basic accessors.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_core::{Clock, EventCatalog, TestClock};
use courier_delivery::{
    storage::{mock::MockDeliveryStorage, DeliveryStorage},
    DeliveryConfig, DeliveryEngine, Dispatcher, FailurePolicy, RegistryConfig, RetryPolicy,
    WebhookRegistry,
};

use crate::{events::RecordingEventHandler, http::MockServer, TestEnv};

/// Builder for configuring a TestEnv.
pub struct TestEnvBuilder {
    worker_count: usize,
    batch_size: usize,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    retry_policy: RetryPolicy,
    failure_threshold: u32,
    extra_events: Vec<String>,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            worker_count: 1,
            batch_size: 10,
            poll_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(5),
            retry_policy: RetryPolicy {
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                jitter_factor: 0.0,
                ..RetryPolicy::default()
            },
            failure_threshold: FailurePolicy::default().threshold,
            extra_events: Vec::new(),
        }
    }
}

impl TestEnvBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of delivery workers (default: 1).
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the claim batch size (default: 10).
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the idle poll interval for started workers (default: 20ms).
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout (default: 5s).
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Replaces the retry policy. The default has no jitter, a 1s base and
    /// a 60s cap so schedules are exact.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the consecutive failure threshold (0 disables it).
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Adds event names to the catalog.
    #[must_use]
    pub fn extra_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_events.extend(events.into_iter().map(Into::into));
        self
    }

    /// Builds the environment and starts the HTTP receiver.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery engine rejects the configuration.
    pub async fn build(self) -> Result<TestEnv> {
        init_tracing();

        let clock = TestClock::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let storage = Arc::new(MockDeliveryStorage::new());
        let dyn_storage: Arc<dyn DeliveryStorage> = storage.clone();
        let catalog = EventCatalog::with_extra(self.extra_events);
        let events = Arc::new(RecordingEventHandler::new());

        let registry = Arc::new(WebhookRegistry::new(
            dyn_storage.clone(),
            shared_clock.clone(),
            RegistryConfig {
                allow_insecure_urls: true,
                catalog: catalog.clone(),
                ..RegistryConfig::default()
            },
        ));
        let dispatcher =
            Arc::new(Dispatcher::new(dyn_storage.clone(), shared_clock.clone(), catalog));

        let config = DeliveryConfig {
            worker_count: self.worker_count,
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
            shutdown_timeout: self.shutdown_timeout,
            retry_policy: self.retry_policy,
            failure_policy: FailurePolicy { threshold: self.failure_threshold },
            ..DeliveryConfig::default()
        };
        let engine = DeliveryEngine::new(dyn_storage, config, shared_clock, events.clone())
            .context("failed to create delivery engine")?;

        Ok(TestEnv {
            http_mock: MockServer::start().await,
            clock,
            storage,
            registry,
            dispatcher,
            engine,
            events,
        })
    }
}

impl TestEnv {
    /// Creates an environment with default settings.
    ///
    /// # Errors
    ///
    /// Returns error if the environment cannot be built.
    pub async fn new() -> Result<Self> {
        Self::builder().build().await
    }

    /// Returns a builder for custom configuration.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// In-memory storage backing this environment.
    pub fn storage(&self) -> Arc<MockDeliveryStorage> {
        self.storage.clone()
    }

    /// Registry wired to this environment's storage and clock.
    pub fn registry(&self) -> &WebhookRegistry {
        &self.registry
    }

    /// Dispatcher wired to this environment's storage and clock.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Shared handle to the registry, for wiring into other services.
    pub fn shared_registry(&self) -> Arc<WebhookRegistry> {
        self.registry.clone()
    }

    /// Shared handle to the dispatcher.
    pub fn shared_dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// The environment clock as a trait object.
    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// The production delivery engine.
    pub fn engine(&self) -> &DeliveryEngine {
        &self.engine
    }

    /// Every delivery event published so far.
    pub fn events(&self) -> Arc<RecordingEventHandler> {
        self.events.clone()
    }

    /// Advances the shared clock.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Current time on the shared clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now_utc()
    }

    /// URL on the HTTP receiver for `path`.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{path}", self.http_mock.uri())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .with_test_writer()
        .try_init();
}
