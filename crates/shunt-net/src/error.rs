//! Flat error taxonomy for socket operations.

use std::io;

use thiserror::Error;

/// Result type alias for socket operations.
pub type NetResult<T> = Result<T, NetError>;

/// What went wrong at the socket layer.
///
/// Deliberately flat: callers translate these into routing policy
/// (quarantine, retry, client-visible error) without inspecting
/// platform error codes.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("operation timed out")]
    TimedOut,

    #[error("operation would block")]
    WouldBlock,

    #[error("connection closed by peer")]
    Closed,

    #[error("connection refused")]
    Refused,

    #[error("host unreachable")]
    Unreachable,

    #[error("name resolution failed for '{0}'")]
    NameResolution(String),

    #[error("socket error: {0}")]
    System(io::Error),
}

impl NetError {
    /// Whether this error means the backend could not be reached at
    /// all, as opposed to a failure on an established connection.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            NetError::TimedOut
                | NetError::Refused
                | NetError::Unreachable
                | NetError::NameResolution(_)
        )
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => NetError::TimedOut,
            io::ErrorKind::WouldBlock => NetError::WouldBlock,
            io::ErrorKind::ConnectionRefused => NetError::Refused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => NetError::Closed,
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                NetError::Unreachable
            }
            _ => NetError::System(err),
        }
    }
}
