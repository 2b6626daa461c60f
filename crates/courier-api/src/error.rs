//! API error type and its JSON rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_core::CoreError;
use courier_delivery::{DeliveryError, RegistryError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request failed validation.
    #[error("{0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Backing store is unreachable or failed.
    #[error("{0}")]
    Unavailable(String),

    /// Unexpected failure.
    #[error("{0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error code and description.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable code
    pub code: &'static str,
    /// Human-readable description
    pub message: String,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body =
            ErrorResponse { error: ErrorDetail { code: self.code(), message: self.to_string() } };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(_) => Self::NotFound(err.to_string()),
            CoreError::InvalidInput(_) | CoreError::ConstraintViolation(_) => {
                Self::Validation(err.to_string())
            },
            CoreError::Database(_) => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::NotFound(err.to_string()),
            RegistryError::Storage(core) => core.into(),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::InvalidRequest { .. } => Self::Validation(err.to_string()),
            DeliveryError::StorageError { .. } => Self::Unavailable(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
