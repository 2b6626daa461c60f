//! Courier webhook delivery service.
//!
//! Main entry point. Loads configuration, connects to Postgres, starts the
//! delivery engine and the HTTP API, and coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_api::{AppState, Config};
use courier_core::{storage::Storage, Clock, RealClock, TracingEventHandler};
use courier_delivery::{
    storage::{DeliveryStorage, PostgresDeliveryStorage},
    DeliveryEngine, Dispatcher, WebhookRegistry,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DB_CONNECT_RETRIES: u32 = 5;
const DB_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_level);

    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        workers = config.worker_pool_size,
        "Configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    let storage = Arc::new(Storage::new(pool));
    storage.run_migrations().await.context("Failed to run database migrations")?;
    info!("Database ready");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let delivery_storage: Arc<dyn DeliveryStorage> =
        Arc::new(PostgresDeliveryStorage::new(storage.clone()));
    let registry_config = config.to_registry_config();
    let catalog = registry_config.catalog.clone();

    let mut engine = DeliveryEngine::new(
        delivery_storage.clone(),
        config.to_delivery_config(),
        clock.clone(),
        Arc::new(TracingEventHandler),
    )
    .context("Failed to create delivery engine")?;
    engine.start().await.context("Failed to start delivery engine")?;

    let state = AppState {
        registry: Arc::new(WebhookRegistry::new(
            delivery_storage.clone(),
            clock.clone(),
            registry_config,
        )),
        dispatcher: Arc::new(Dispatcher::new(delivery_storage.clone(), clock.clone(), catalog)),
        storage: delivery_storage,
        clock,
        request_timeout: config.request_timeout(),
    };

    let addr = config.parse_server_addr()?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = courier_api::start_server(state, addr, shutdown.cancelled_owned()).await
            {
                error!(error = %e, "Server failed");
            }
        }
    });

    info!(%addr, "Courier is ready");

    courier_api::shutdown_signal().await;
    shutdown.cancel();

    if let Err(e) = server.await {
        error!(error = %e, "Server task failed");
    }

    let stats = engine.stats().await;
    engine.shutdown().await.context("Delivery engine did not shut down cleanly")?;
    info!(
        processed = stats.attempts_processed,
        succeeded = stats.successful_deliveries,
        failed = stats.failed_deliveries,
        "Delivery engine stopped"
    );

    storage.pool().close().await;
    info!("Courier shutdown complete");
    Ok(())
}

/// Initializes tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Connects to Postgres, retrying while the database comes up.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < DB_CONNECT_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = DB_CONNECT_RETRIES,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(DB_RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
