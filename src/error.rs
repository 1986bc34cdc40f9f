use thiserror::Error;

use crate::llm::ProviderType;

/// Failures raised by a chat provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Required credential or setting is missing. No network call was made.
    #[error("{provider} is not configured: {reason}")]
    Configuration { provider: ProviderType, reason: String },

    /// Upstream answered with a failure status, or the call never completed.
    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Upstream answered, but the payload was not in the expected shape.
    #[error("malformed upstream payload: {0}")]
    Protocol(String),
}

impl ProviderError {
    pub fn configuration(provider: ProviderType, reason: impl Into<String>) -> Self {
        ProviderError::Configuration { provider, reason: reason.into() }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Upstream { status: 504, body: format!("request timed out: {}", e) }
        } else if e.is_decode() {
            ProviderError::Protocol(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::Upstream { status: status.as_u16(), body: e.to_string() }
        } else {
            ProviderError::Upstream { status: 502, body: e.to_string() }
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("transcript I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcript encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A send-chat request that failed validation. Nothing was dispatched or stored.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidRequest(pub String);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),

    #[error("provider '{provider}' is unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
