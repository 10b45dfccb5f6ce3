//! Error types for the sidekick gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway process
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Output (sink) error
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Error type for output operations
///
/// Construction-time failures surface as [`SinkError::ClientCreation`]; every
/// other variant is a per-request failure that outputs log and count but never
/// hand back to the event source.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Network failure or a server-side (5xx, 429) HTTP status
    #[error("transport error: {0}")]
    Transport(String),

    /// Vendor refused the request with a client error status (bad API key,
    /// unknown org). Repeating the request cannot succeed.
    #[error("transport error: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Vendor rejected the request content
    #[error("bad request: {0}")]
    Validation(String),

    /// Output could not establish a usable remote resource
    #[error("client creation failed for output '{output}': {reason}")]
    ClientCreation { output: &'static str, reason: String },

    /// Required event field is absent
    #[error("missing event field '{0}'")]
    MissingField(String),

    /// Event field holds an unexpected type
    #[error("event field '{field}' has unexpected type (expected {expected})")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },

    /// Payload could not be serialized or compressed
    #[error("encode error: {0}")]
    Encode(String),
}

impl SinkError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transport(_))
    }

    /// Classify a non-success HTTP response
    ///
    /// 4xx statuses other than 429 are [`SinkError::Rejected`]; everything
    /// else is a retryable [`SinkError::Transport`].
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            SinkError::Rejected {
                status: status.as_u16(),
                body,
            }
        } else if body.is_empty() {
            SinkError::Transport(format!("HTTP error: {status}"))
        } else {
            SinkError::Transport(format!("HTTP error: {status}: {body}"))
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Transport(err.to_string())
    }
}
