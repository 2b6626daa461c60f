//! HTTP receiver helpers built on wiremock.

use std::time::Duration;

use courier_delivery::signer::SIGNATURE_HEADER;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};
pub use wiremock::MockServer;

use crate::TestEnv;

/// Canned receiver behavior.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Responds with `status` and `body`.
    Success {
        /// 2xx status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Responds with an error status and an empty body.
    Failure {
        /// Status code.
        status: u16,
    },
    /// Responds with `status` and a `Retry-After` header.
    RetryAfter {
        /// Status code, usually 429 or 503.
        status: u16,
        /// Header value in seconds.
        seconds: u64,
    },
    /// Responds with `status` after `delay`.
    Delayed {
        /// Status code.
        status: u16,
        /// Time before the response is sent.
        delay: Duration,
    },
}

impl MockResponse {
    /// `200 OK` with a small JSON body.
    pub fn ok() -> Self {
        Self::Success { status: 200, body: r#"{"received":true}"#.to_string() }
    }

    /// Error response with `status`.
    pub fn failure(status: u16) -> Self {
        Self::Failure { status }
    }

    /// Converts to a wiremock response template.
    pub fn into_template(self) -> ResponseTemplate {
        match self {
            Self::Success { status, body } => ResponseTemplate::new(status).set_body_string(body),
            Self::Failure { status } => ResponseTemplate::new(status),
            Self::RetryAfter { status, seconds } => {
                ResponseTemplate::new(status).insert_header("Retry-After", seconds.to_string())
            },
            Self::Delayed { status, delay } => ResponseTemplate::new(status).set_delay(delay),
        }
    }
}

/// A POST as seen by the receiver.
#[derive(Debug, Clone)]
pub struct ReceivedDelivery {
    /// Request path.
    pub path: String,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// Parsed JSON envelope, `Null` if the body is not JSON.
    pub envelope: serde_json::Value,
    /// Lower-cased header names with their values.
    pub headers: Vec<(String, String)>,
}

impl ReceivedDelivery {
    /// First value of header `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
    }

    /// The signature header value.
    pub fn signature(&self) -> Option<&str> {
        self.header(SIGNATURE_HEADER)
    }
}

impl TestEnv {
    /// Serves `response` for every POST to `path`.
    pub async fn mock_endpoint(&self, endpoint_path: &str, response: MockResponse) {
        Mock::given(method("POST"))
            .and(path(endpoint_path))
            .respond_with(response.into_template())
            .mount(&self.http_mock)
            .await;
    }

    /// Serves `response` for the next `times` POSTs to `path`, ahead of any
    /// endpoint mounted later.
    pub async fn mock_endpoint_times(&self, endpoint_path: &str, response: MockResponse, times: u64) {
        Mock::given(method("POST"))
            .and(path(endpoint_path))
            .respond_with(response.into_template())
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.http_mock)
            .await;
    }

    /// Serves `responses` in order, one per POST to `path`, then keeps
    /// serving the last one.
    pub async fn mock_endpoint_sequence(&self, endpoint_path: &str, responses: Vec<MockResponse>) {
        let Some((last, leading)) = responses.split_last() else {
            return;
        };
        for response in leading {
            self.mock_endpoint_times(endpoint_path, response.clone(), 1).await;
        }
        self.mock_endpoint(endpoint_path, last.clone()).await;
    }

    /// Every POST received so far, oldest first.
    pub async fn received_deliveries(&self) -> Vec<ReceivedDelivery> {
        self.http_mock
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.method.as_str() == "POST")
            .map(|request| ReceivedDelivery {
                path: request.url.path().to_string(),
                envelope: serde_json::from_slice(&request.body).unwrap_or(serde_json::Value::Null),
                headers: request
                    .headers
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str().to_ascii_lowercase(),
                            value.to_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect(),
                body: request.body,
            })
            .collect()
    }

    /// POSTs received on `path`.
    pub async fn received_on(&self, endpoint_path: &str) -> Vec<ReceivedDelivery> {
        self.received_deliveries().await.into_iter().filter(|d| d.path == endpoint_path).collect()
    }
}
