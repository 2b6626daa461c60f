//! Event trigger handler.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use courier_core::TenantId;
use courier_delivery::DispatchReport;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{error::Result, AppState};

/// Event trigger request body.
#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    /// Catalog event name
    pub event: String,
    /// Event data delivered as the envelope's `data`
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Fans an event out to the tenant's subscribed webhooks.
///
/// Responds `202 Accepted` with the created attempts; delivery happens
/// asynchronously in the engine.
#[instrument(
    name = "dispatch_event",
    skip(state, request),
    fields(tenant_id = %tenant_id, event = %request.event)
)]
pub async fn dispatch_event(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(request): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<DispatchReport>)> {
    let report =
        state.dispatcher.dispatch(TenantId::from(tenant_id), &request.event, request.payload).await?;

    info!(
        event_id = %report.event_id,
        attempts = report.attempts_created(),
        "event accepted"
    );

    Ok((StatusCode::ACCEPTED, Json(report)))
}
