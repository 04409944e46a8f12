//! Error types and result aliases for the typed façade.

use thiserror::Error;
use tkv_client::ClientError;

use crate::codec::CodecError;
use crate::strings::SetCondition;

/// Result type for façade operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by façade operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached, a reconnect failed, or the link is gone.
    #[error("connection error: {0}")]
    Connection(#[source] ClientError),

    /// The store answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The reply did not have the shape the operation expects, or a numeric
    /// reply could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[source] ClientError),

    /// A value could not be encoded or a stored text could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The store has no command for this conditional write.
    #[error("{command} does not support condition {condition:?}")]
    UnsupportedCondition {
        command: &'static str,
        condition: SetCondition,
    },

    /// An argument is outside the range the command accepts.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection descriptor is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A background task running a blocking call failed.
    #[error("task error: {0}")]
    Task(String),
}

impl StoreError {
    /// True for connectivity faults (as opposed to data or usage faults).
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    /// True when stored text could not be parsed into the requested type.
    pub fn is_decode(&self) -> bool {
        matches!(self, StoreError::Codec(CodecError::Decode(_)))
    }
}

impl From<ClientError> for StoreError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Server { message } => {
                StoreError::Server(String::from_utf8_lossy(&message).into_owned())
            }
            ClientError::UnexpectedResponse => StoreError::Protocol(err),
            // Broken framing leaves the socket unusable, same as an IO fault.
            other => StoreError::Connection(other),
        }
    }
}
