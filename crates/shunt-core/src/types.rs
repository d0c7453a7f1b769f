//! Routing modes, wire protocols, and server-parity defaults.

use std::time::Duration;

/// How long an established session may sit idle before the router
/// disconnects it. Mirrors the server's `wait_timeout`.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on concurrently serviced client connections per route.
pub const DEFAULT_MAX_CONNECTIONS: usize = 512;

/// How long to wait for a backend to accept a connection.
pub const DEFAULT_DESTINATION_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Handshake-phase inactivity deadline. One second below the server's
/// own `connect_timeout` so the router gives up first.
pub const DEFAULT_CLIENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(9);

/// Handshake failures from one host before that host is blocked.
pub const DEFAULT_MAX_CONNECT_ERRORS: u64 = 100;

/// Per-connection transfer buffer size; matches the server's
/// `net_buffer_length` default.
pub const DEFAULT_NET_BUFFER_LENGTH: usize = 16 * 1024;

/// Listener bind address when none is configured.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default server port for the classic protocol.
pub const DEFAULT_CLASSIC_PORT: u16 = 3306;

/// Default server port for the X protocol.
pub const DEFAULT_X_PORT: u16 = 33060;

/// What kind of traffic a route carries, and therefore which cluster
/// members it may be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    /// Parse the configuration-file spelling of an access mode.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read-write" => Some(AccessMode::ReadWrite),
            "read-only" => Some(AccessMode::ReadOnly),
            _ => None,
        }
    }

    /// The configuration-file spelling of this access mode.
    pub fn name(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "read-write",
            AccessMode::ReadOnly => "read-only",
        }
    }
}

/// The wire protocol a route speaks. Fixed per listener at
/// configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Classic,
    X,
}

impl Protocol {
    /// Parse the configuration-file spelling of a protocol.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "classic" => Some(Protocol::Classic),
            "x" => Some(Protocol::X),
            _ => None,
        }
    }

    /// The configuration-file spelling of this protocol.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Classic => "classic",
            Protocol::X => "x",
        }
    }

    /// The server port convention for this protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Classic => DEFAULT_CLASSIC_PORT,
            Protocol::X => DEFAULT_X_PORT,
        }
    }
}
