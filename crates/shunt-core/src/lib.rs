//! Core types for the shunt MySQL connection router.
//!
//! Shared by every other crate in the workspace:
//! - Backend endpoint addressing
//! - Routing modes and wire protocols
//! - Server-parity defaults
//! - The TOML configuration surface and its validation rules

pub mod config;
pub mod endpoint;
pub mod types;

pub use config::{ConfigError, Destinations, RouteConfig, RouterConfig};
pub use endpoint::Endpoint;
pub use types::{AccessMode, Protocol};
