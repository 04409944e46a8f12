//! Error types for the store link.

use thiserror::Error;

/// Result type for the store link.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the store link.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Reply type did not match the expected command reply.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// The peer closed the connection or the link was closed locally.
    #[error("connection closed")]
    Closed,
}

impl ClientError {
    /// Returns true when the failure means the underlying socket is unusable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Protocol
                | ClientError::Closed
                | ClientError::InvalidAddress(_)
        )
    }
}
