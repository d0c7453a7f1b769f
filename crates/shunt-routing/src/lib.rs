//! Destination selection and client admission policy for the shunt
//! router.
//!
//! Two destination strategies behind one tagged variant:
//! - A static endpoint list with failure-triggered quarantine and a
//!   background recovery probe
//! - A metadata-cache view of a replicaset, filtered by role and
//!   health, with a bounded wait for primary failover
//!
//! Plus the per-host error tracker that blocks abusive clients.

pub mod blocklist;
pub mod dest_cache;
pub mod destination;
pub mod error;
pub mod metadata;
pub mod selector;

pub use blocklist::ClientBlocklist;
pub use dest_cache::CacheDestinations;
pub use destination::{ConnectOutcome, StaticDestinations};
pub use error::{SelectError, SelectResult};
pub use metadata::{BoxFuture, Instance, MetadataCache, ServerMode, ServerRole};
pub use selector::DestinationSelector;
