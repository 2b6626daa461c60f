//! Health check handlers for service monitoring.
//!
//! Liveness, readiness, and health endpoints. Health and readiness probe the
//! backing store; liveness only shows the process is serving requests.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use courier_core::Clock;
use courier_delivery::storage::DeliveryStorage;
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Critical systems failing
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Storage connectivity
    pub database: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Runs health probes against storage, timed with an injected clock.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Checks every component and summarizes.
    pub async fn health_check(&self, storage: &dyn DeliveryStorage) -> HealthResponse {
        debug!("Performing health check");

        let timestamp = self.clock.now_utc();
        let started = self.clock.now();

        let database = match storage.health_check().await {
            Ok(()) => ComponentHealth {
                status: ComponentStatus::Up,
                message: None,
                response_time_ms: 0,
            },
            Err(e) => {
                error!(error = %e, "database health check failed");
                ComponentHealth {
                    status: ComponentStatus::Down,
                    message: Some(format!("Database connection failed: {e}")),
                    response_time_ms: 0,
                }
            },
        };
        let elapsed = self.clock.now().saturating_duration_since(started);

        let status = match database.status {
            ComponentStatus::Up => HealthStatus::Healthy,
            ComponentStatus::Down => HealthStatus::Unhealthy,
        };

        HealthResponse {
            status,
            timestamp,
            checks: HealthChecks {
                database: ComponentHealth {
                    response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    ..database
                },
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check endpoint handler.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let response = HealthService::new(state.clock.clone()).health_check(state.storage.as_ref()).await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, db_status = ?response.checks.database.status, "health check completed");

    (status_code, Json(response)).into_response()
}

/// Readiness probe: storage must answer and the pending backlog be countable.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.storage.count_pending().await {
        Ok(pending) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "pending_attempts": pending,
                "timestamp": state.clock.now_utc(),
            })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "message": e.to_string(),
                    "timestamp": state.clock.now_utc(),
                })),
            )
                .into_response()
        },
    }
}

/// Liveness probe. Touches no external dependency.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "courier",
    });

    (StatusCode::OK, Json(response)).into_response()
}
