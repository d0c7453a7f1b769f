//! Proxy-level error types.

use thiserror::Error;

use shunt_net::NetError;

/// Result type alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors surfaced while starting or stopping routes.
///
/// Per-connection failures never show up here; they die with their
/// worker and are logged in place.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("route '{route}' failed to bind: {source}")]
    Bind { route: String, source: NetError },

    #[error("route '{route}': {reason}")]
    Route { route: String, reason: String },
}
