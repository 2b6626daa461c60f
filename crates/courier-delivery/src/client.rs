//! HTTP client for webhook delivery.
//!
//! Wraps two pooled `reqwest` clients, one verifying TLS certificates and
//! one not, so each webhook's `verify_ssl` flag is honoured without building
//! a client per request. Each request gets the webhook's own deadline.
//! Transport failures become `DeliveryError`s; any HTTP response, including
//! non-2xx, is returned as a `DeliveryResponse` for the executor to record.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use reqwest::{header::HeaderMap, Response};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Response bytes kept for the attempt record.
    pub max_response_body_bytes: usize,
    /// Time allowed to establish a connection, independent of the request
    /// deadline.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "Courier-Webhooks/1.0".to_string(),
            max_redirects: 3,
            max_response_body_bytes: 16 * 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Outbound request for a single attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Destination URL.
    pub url: String,
    /// Serialized JSON body; signed as-is.
    pub body: Bytes,
    /// Tenant-configured headers. Managed names are dropped.
    pub custom_headers: HashMap<String, String>,
    /// Headers set by the engine (signature, ids, attempt number).
    pub webhook_headers: Vec<(&'static str, String)>,
    /// Request deadline.
    pub timeout: Duration,
    /// Whether to verify the server certificate.
    pub verify_ssl: bool,
}

/// Any HTTP response received for an attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Response body, truncated to `max_response_body_bytes`.
    pub body: String,
    /// Total duration of the exchange.
    pub duration: Duration,
}

impl DeliveryResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Failure described by this response, `None` for 2xx.
    pub fn error(&self) -> Option<DeliveryError> {
        DeliveryError::from_status(
            self.status_code,
            &self.body,
            extract_retry_after_seconds(&self.headers),
        )
    }
}

/// Pooled HTTP client used by every worker.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    verifying: reqwest::Client,
    insecure: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let build = |verify_tls: bool| {
            reqwest::Client::builder()
                .user_agent(&config.user_agent)
                .connect_timeout(config.connect_timeout)
                .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
                .danger_accept_invalid_certs(!verify_tls)
                .build()
                .map_err(|e| {
                    DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
                })
        };

        Ok(Self { verifying: build(true)?, insecure: build(false)?, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// See [`DeliveryClient::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POSTs the request and returns whatever the server answered.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the deadline elapses; the in-flight request is dropped
    /// - `NetworkError` for connection and I/O failures
    /// - `InvalidRequest` for malformed URLs, bad headers and redirect loops
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let span = info_span!(
            "http_post",
            url = %request.url,
            timeout_ms = request.timeout.as_millis() as u64,
            verify_ssl = request.verify_ssl,
        );

        async move {
            let start_time = std::time::Instant::now();
            let client = if request.verify_ssl { &self.verifying } else { &self.insecure };

            let mut http_request = client
                .post(&request.url)
                .timeout(request.timeout)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(request.body);

            for (key, value) in &request.custom_headers {
                if !is_managed_header(key) {
                    http_request = http_request.header(key, value);
                }
            }
            for (key, value) in &request.webhook_headers {
                http_request = http_request.header(*key, value);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(
                        duration_ms = start_time.elapsed().as_millis() as u64,
                        error = %e,
                        "request failed before a response"
                    );
                    return Err(classify_transport_error(&e, request.timeout));
                },
            };

            let delivery_response = self.read_response(response, request.timeout, start_time).await?;

            tracing::debug!(
                status = delivery_response.status_code,
                duration_ms = delivery_response.duration.as_millis() as u64,
                "response received"
            );

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }

    /// Reads status, headers and a bounded prefix of the body.
    async fn read_response(
        &self,
        mut response: Response,
        timeout: Duration,
        start_time: std::time::Instant,
    ) -> Result<DeliveryResponse> {
        let status_code = response.status().as_u16();
        let headers = extract_headers(response.headers());

        let limit = self.config.max_response_body_bytes;
        let mut body = Vec::with_capacity(limit.min(4096));
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let remaining = limit.saturating_sub(body.len());
                    body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                    if body.len() >= limit {
                        break;
                    }
                },
                Ok(None) => break,
                Err(e) if e.is_timeout() => {
                    return Err(DeliveryError::timeout(duration_ms(timeout)));
                },
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read response body");
                    break;
                },
            }
        }

        Ok(DeliveryResponse {
            status_code,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            duration: start_time.elapsed(),
        })
    }
}

fn classify_transport_error(error: &reqwest::Error, timeout: Duration) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::timeout(duration_ms(timeout))
    } else if error.is_builder() || error.is_redirect() {
        DeliveryError::invalid_request(error.to_string())
    } else if error.is_connect() {
        DeliveryError::network(format!("connection failed: {error}"))
    } else {
        DeliveryError::network(error.to_string())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Extracts headers from reqwest HeaderMap into a standard HashMap.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| value.to_str().ok().map(|v| (key.to_string(), v.to_string())))
        .collect()
}

/// Headers the engine controls; tenant configuration cannot override them.
pub fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_ascii_lowercase();
    lowercase.starts_with("x-webhook-")
        || matches!(
            lowercase.as_str(),
            "content-type"
                | "content-length"
                | "host"
                | "user-agent"
                | "connection"
                | "keep-alive"
                | "proxy-authenticate"
                | "proxy-authorization"
                | "te"
                | "trailer"
                | "transfer-encoding"
                | "upgrade"
        )
}

/// Extracts a `Retry-After` delay in seconds.
///
/// Supports delta-seconds and HTTP-date values. Unparseable values fall back
/// to 60 seconds; a date in the past yields 0.
pub fn extract_retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
) -> Option<u64> {
    const DEFAULT_RETRY_AFTER: u64 = 60;

    let retry_after = headers.get("retry-after").or_else(|| headers.get("Retry-After"))?;
    let retry_after = retry_after.trim();

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let wait = date_time.with_timezone(&chrono::Utc) - chrono::Utc::now();
        return Some(wait.to_std().map(|d| d.as_secs()).unwrap_or(0));
    }

    Some(DEFAULT_RETRY_AFTER)
}
