//! Error taxonomy shared by the retrieval pipeline.
//!
//! Provider calls classify their failures as transient (retried under a
//! [`RetryPolicy`](crate::llm::retry::RetryPolicy)) or permanent (surfaced
//! immediately). Input problems are rejected as [`RagError::Validation`]
//! before any network call is made.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Timeout, rate limit or 5xx from a provider. Safe to retry.
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// Bad credentials, unknown model or any other non-retryable failure that
    /// no other input would avoid.
    #[error("permanent provider error: {0}")]
    PermanentProvider(String),

    /// The provider refused this particular input (malformed, too long).
    /// Not retried, but other inputs may still succeed.
    #[error("provider rejected input: {0}")]
    RejectedInput(String),

    /// Malformed input, rejected before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// Store or index limits reached.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Native embedding dimension is larger than the store dimension.
    #[error("embedding dimension {native} exceeds vector store dimension {store}")]
    DimensionMismatch { native: usize, store: usize },

    /// Local index persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A newer message arrived for the same context while this turn was in flight.
    #[error("turn superseded by a newer message in context {0}")]
    Superseded(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::TransientProvider(_))
    }

    /// Classify a non-success HTTP response from a provider.
    pub fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(500).collect();
        let message = format!("{provider} returned {status}: {snippet}");
        if is_retryable_status(status) {
            RagError::TransientProvider(message)
        } else if is_input_status(status) {
            RagError::RejectedInput(message)
        } else {
            RagError::PermanentProvider(message)
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_transport(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            RagError::TransientProvider(format!("{provider} request failed: {err}"))
        } else if err.is_decode() {
            RagError::PermanentProvider(format!("{provider} sent an unreadable response: {err}"))
        } else {
            RagError::TransientProvider(format!("{provider} error: {err}"))
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_EARLY
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_input_status(status: StatusCode) -> bool {
    status == StatusCode::BAD_REQUEST
        || status == StatusCode::PAYLOAD_TOO_LARGE
        || status == StatusCode::UNPROCESSABLE_ENTITY
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}
