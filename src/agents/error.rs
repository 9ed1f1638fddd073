//! Typed errors for agent service operations
//!
//! Lets the run loop tell transient transport failures (retry with backoff)
//! apart from failures that should abort immediately.

use thiserror::Error;

/// Agent service errors with typed variants
///
/// - `Unauthorized` (401/403) - credentials missing or rejected
/// - `RateLimited` (429) - retry after a delay
/// - `BadRequest` (400) - malformed request; caller error
/// - `NotFound` (404) - thread, run or agent does not exist
/// - `ServiceError` (5xx) - server-side issue; can retry
/// - `Network` - connection/timeout; can retry
/// - `Decode` - the response body did not have the expected shape
/// - `Other` - catch-all
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient server issues. Can retry with backoff.
    #[error("Service error: {0}")]
    ServiceError(String),

    /// Connection refused, timeout and similar. Can retry with backoff.
    #[error("Network error: {0}")]
    Network(String),

    /// Response could not be deserialized; names the operation that failed
    #[error("Unexpected response from {operation}: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Check if this error is worth retrying after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::RateLimited(_) | AgentError::ServiceError(_) | AgentError::Network(_)
        )
    }

    /// Convert HTTP status code and error text into a typed error
    pub fn from_http_status(status: reqwest::StatusCode, error_text: String) -> Self {
        match status.as_u16() {
            401 | 403 => AgentError::Unauthorized(error_text),
            404 => AgentError::NotFound(error_text),
            429 => AgentError::RateLimited(error_text),
            400 => AgentError::BadRequest(error_text),
            500..=599 => AgentError::ServiceError(error_text),
            _ => AgentError::Other(anyhow::anyhow!("HTTP {}: {}", status, error_text)),
        }
    }

    /// Convert network/connection errors into a typed error
    pub fn from_network_error(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AgentError::Network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            AgentError::Network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            let error_text = e.to_string();
            Self::from_http_status(status, error_text)
        } else {
            AgentError::Other(e.into())
        }
    }
}
