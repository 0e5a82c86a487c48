use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use tracing::debug;

use crate::errors::StreamFailure;

/// Response body as an ordered sequence of raw chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Failure below the HTTP status layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("stream read failed: {0}")]
    Io(String),
}

impl From<TransportError> for StreamFailure {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Timeout => StreamFailure::Timeout,
            TransportError::Connect(message) | TransportError::Io(message) => {
                StreamFailure::Network(message)
            }
        }
    }
}

/// A fully built provider request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status line plus a streaming body.
pub struct HttpStreamResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, in seconds.
    pub retry_after: Option<u64>,
    pub body: ByteStream,
}

impl HttpStreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport abstraction. The default implementation is
/// [`ReqwestTransport`]; tests pass scripted fakes.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends a POST and returns as soon as response headers arrive.
    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, TransportError>;
}

/// Default transport backed by a shared `reqwest::Client`.
///
/// Dropping the returned body aborts the underlying request.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, StreamFailure> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                StreamFailure::InvalidConfiguration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing client (for custom TLS or proxy settings).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, TransportError> {
        let mut builder = self.client.post(request.url.as_str()).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        debug!(
            event = "transport.response_headers",
            domain = "transport",
            status = status,
            retry_after = ?retry_after
        );
        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Io(e.to_string())
                }
            })
        });
        Ok(HttpStreamResponse {
            status,
            retry_after,
            body: Box::pin(body),
        })
    }
}

/// Parses a delay-seconds `Retry-After` value. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| secs.ceil() as u64)
    })
}
