//! Selection error types.

use thiserror::Error;

/// Result type alias for destination selection.
pub type SelectResult<T> = Result<T, SelectError>;

/// Why the selector could not produce a backend.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// Every destination is quarantined or filtered out right now;
    /// the route stays up and the client gets a connect error.
    #[error("all destinations are temporarily unavailable")]
    ExhaustedTemporarily,

    /// The selector has nothing configured at all. Configuration
    /// validation makes this unreachable in a running router.
    #[error("no destinations configured")]
    ExhaustedPermanent,
}
