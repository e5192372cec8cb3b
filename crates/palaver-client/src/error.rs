//! Client-side error types.

use thiserror::Error;

/// Errors from the client transport and connection manager.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not be established; retryable.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The server refused the token; retrying without a new token is
    /// pointless.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The transport broke mid-session.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// A received frame was not a valid server event.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Whether reconnecting could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClientError::AuthenticationFailed(_))
    }
}
