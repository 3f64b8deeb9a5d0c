//! Error types for parley-session

use thiserror::Error;

/// Result type alias using parley-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the protocol/transport layer
    #[error(transparent)]
    Proto(#[from] parley_proto::Error),

    /// The operation needs a current session and none is selected
    #[error("No session selected")]
    NoCurrentSession,

    /// The session is not known to the directory
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A generic session error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if retrying the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Proto(e) => e.is_retryable(),
            _ => false,
        }
    }
}
