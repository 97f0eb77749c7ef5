//! Streamgate error types.

use thiserror::Error;

/// Errors that can occur while resolving entitlements or talking to the backend.
#[derive(Debug, Error)]
pub enum StreamgateError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No signed-in session (user id or access token absent).
    #[error("No authenticated session")]
    MissingSession,

    /// HTTP transport error communicating with the backend.
    #[error("Backend transport error: {0}")]
    BackendTransport(String),

    /// Backend answered with a non-success status.
    #[error("Backend returned HTTP {status}")]
    BackendStatus {
        /// HTTP status code returned by the backend.
        status: u16,
    },

    /// The caller is not allowed to perform the requested action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Caller-supplied argument is out of range.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failed to parse a backend response or cached payload.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The operation was cancelled because its owner shut down.
    #[error("Operation cancelled")]
    Cancelled,
}

impl StreamgateError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamgateError::BackendTransport(_)
                | StreamgateError::BackendStatus {
                    status: 429 | 500..=599
                }
        )
    }
}
