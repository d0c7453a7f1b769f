//! Wire-level error types.

use thiserror::Error;

/// Result type alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// A protocol violation observed during handshake inspection.
///
/// Every variant aborts the connection and is attributed to the
/// client host by the forwarder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated frame")]
    Truncated,

    #[error("packet out of sequence (was {got}, expected {expected})")]
    OutOfSequence { expected: u8, got: u8 },

    #[error("unexpected first client message type {0}")]
    UnexpectedClientMessage(u8),

    #[error("message of {len} bytes exceeds the {max} byte handshake buffer")]
    Oversize { len: usize, max: usize },

    #[error("malformed packet: {0}")]
    BadPacket(String),
}
