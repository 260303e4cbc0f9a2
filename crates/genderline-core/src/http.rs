//! HTTP client construction and error classification.
//!
//! The client is built once per run and owned by the pipeline context;
//! nothing here is process-global.

use std::time::Duration;

/// Timeouts applied to every inference request
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Whole-request deadline (local models can take a while to answer)
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Error types for inference HTTP calls
#[derive(Debug)]
pub enum HttpError {
    /// Endpoint unreachable (refused, DNS, TLS handshake)
    Connect(String),
    /// No complete response within the request timeout
    Timeout(String),
    /// Endpoint answered with a non-success status
    Status { status: u16, message: String },
    /// Body read failures, redirect loops, client build errors
    Other(String),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(m) => write!(f, "connection failed: {m}"),
            Self::Timeout(m) => write!(f, "timed out: {m}"),
            Self::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Other(m) => write!(f, "HTTP error: {m}"),
        }
    }
}

impl std::error::Error for HttpError {}

impl HttpError {
    /// Classify a reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        let message = e.to_string();
        if e.is_timeout() {
            Self::Timeout(message)
        } else if e.is_connect() {
            Self::Connect(message)
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                message,
            }
        } else {
            Self::Other(message)
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        Self::from_reqwest(&e)
    }
}

/// Build the async client used for all backend calls of one run.
pub fn build_http_client(config: &HttpConfig) -> Result<reqwest::Client, HttpError> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(16)
        .build()
        .map_err(|e| HttpError::Other(e.to_string()))
}
