//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID propagation
//! 2. Request/response tracing
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! # Graceful Shutdown
//!
//! [`start_server`] stops accepting connections when the supplied shutdown
//! future resolves and waits for in-flight requests before returning.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use courier_core::Clock;
use courier_delivery::{storage::DeliveryStorage, Dispatcher, WebhookRegistry};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::handlers;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Webhook registration and lifecycle
    pub registry: Arc<WebhookRegistry>,
    /// Event fan-out
    pub dispatcher: Arc<Dispatcher>,
    /// Direct storage access for health probes and attempt history
    pub storage: Arc<dyn DeliveryStorage>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Per-request deadline
    pub request_timeout: Duration,
}

/// Creates the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use courier_api::{create_router, AppState};
///
/// async fn start(state: AppState) {
///     let app = create_router(state);
///     // Serve the app...
/// }
/// ```
pub fn create_router(state: AppState) -> Router {
    let timeout = state.request_timeout;

    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let api_routes = Router::new()
        .route(
            "/tenants/{tenant_id}/webhooks",
            post(handlers::register_webhook).get(handlers::list_webhooks),
        )
        .route("/tenants/{tenant_id}/events", post(handlers::dispatch_event))
        .route("/webhooks/{id}", get(handlers::get_webhook))
        .route("/webhooks/{id}/enable", post(handlers::enable_webhook))
        .route("/webhooks/{id}/disable", post(handlers::disable_webhook))
        .route("/webhooks/{id}/attempts", get(handlers::list_attempts));

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Propagates the caller's `X-Request-Id`, or assigns one, and echoes it on
/// the response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Serves the API until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or the server
/// fails while serving.
pub async fn start_server<F>(
    state: AppState,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight requests to complete");
}
