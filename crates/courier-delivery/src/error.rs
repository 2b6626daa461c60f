//! Error types for webhook delivery operations.
//!
//! Every failed attempt is described by a `DeliveryError`. The variant
//! decides retry eligibility: transport failures, timeouts, 5xx, 408, 425
//! and 429 are transient; every other non-2xx response and request
//! construction failure is permanent.

use std::fmt;

use courier_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Connection could not be established or broke mid-request.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// The per-webhook deadline elapsed before a response arrived.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
        /// `Retry-After` hint; only kept for 503
        retry_after_seconds: Option<u64>,
    },

    /// HTTP 429 from the receiver.
    #[error("rate limited by endpoint")]
    RateLimited {
        /// `Retry-After` hint, if the server sent one
        retry_after_seconds: Option<u64>,
    },

    /// Non-2xx status outside the 4xx/5xx ranges, e.g. an unfollowed redirect.
    #[error("unexpected response: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
    },

    /// The request could not be built or sent as configured.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request
        message: String,
    },

    /// Storage operation failed during delivery.
    #[error("storage error: {message}")]
    StorageError {
        /// Storage error message
        message: String,
    },

    /// Invalid delivery configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout_ms}ms")]
    ShutdownTimeout {
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker
        worker_id: usize,
        /// Join error description
        error: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a client error from HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into(), retry_after_seconds: None }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Classifies a completed HTTP exchange. Returns `None` for 2xx.
    ///
    /// `Retry-After` is kept for 429 and 503 and dropped for other statuses.
    pub fn from_status(
        status_code: u16,
        body: &str,
        retry_after_seconds: Option<u64>,
    ) -> Option<Self> {
        match status_code {
            200..=299 => None,
            429 => Some(Self::RateLimited { retry_after_seconds }),
            400..=499 => Some(Self::client_error(status_code, body)),
            500..=599 => Some(Self::ServerError {
                status_code,
                body: body.to_string(),
                retry_after_seconds: retry_after_seconds.filter(|_| status_code == 503),
            }),
            _ => Some(Self::UnexpectedStatus { status_code }),
        }
    }

    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. } => true,

            // Request Timeout and Too Early are transient despite being 4xx.
            Self::ClientError { status_code, .. } => matches!(status_code, 408 | 425),

            Self::UnexpectedStatus { .. }
            | Self::InvalidRequest { .. }
            | Self::StorageError { .. }
            | Self::ConfigurationError { .. }
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. } => false,
        }
    }

    /// `Retry-After` hint carried by 429 and 503 responses.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds }
            | Self::ServerError { retry_after_seconds, .. } => *retry_after_seconds,
            _ => None,
        }
    }

    /// HTTP status code, when the failure came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. }
            | Self::ServerError { status_code, .. }
            | Self::UnexpectedStatus { status_code } => Some(*status_code),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::storage(err.to_string())
    }
}

/// Coarse failure class, logged with every failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Request construction or unexpected protocol behaviour.
    Request,
    /// Storage operations.
    Storage,
    /// Configuration problems and worker lifecycle.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::UnexpectedStatus { .. } | DeliveryError::InvalidRequest { .. } => {
                Self::Request
            },
            DeliveryError::StorageError { .. } => Self::Storage,
            DeliveryError::ConfigurationError { .. }
            | DeliveryError::ShutdownTimeout { .. }
            | DeliveryError::WorkerPanic { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Request => write!(f, "request"),
            Self::Storage => write!(f, "storage"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
