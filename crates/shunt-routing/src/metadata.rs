//! Consumer contract for the cluster metadata cache.
//!
//! The cache itself runs outside the routing core: it periodically
//! queries the cluster for membership and role assignment, publishes
//! immutable snapshots, and swaps them atomically. The router only
//! reads.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by collaborator methods that may wait.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The replication role a cluster member holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Primary,
    Secondary,
}

/// Whether a cluster member accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    ReadWrite,
    ReadOnly,
}

/// One replicaset member as reported by the metadata cache.
///
/// Immutable within a snapshot; the cache replaces instances
/// wholesale on refresh.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Stable server identity, preserved across address changes.
    pub uuid: String,
    pub host: String,
    pub classic_port: u16,
    pub x_port: u16,
    pub role: ServerRole,
    pub mode: ServerMode,
}

/// Read-only view of the metadata cache consumed by the selector.
pub trait MetadataCache: Send + Sync {
    /// Current snapshot of the replicaset's members.
    fn lookup(&self, replicaset: &str) -> Vec<Instance>;

    /// Tell the cache a member did not accept a connection so it can
    /// accelerate its own re-probe.
    fn mark_unreachable(&self, uuid: &str);

    /// Wait up to `timeout` for a new primary to be elected. Resolves
    /// `true` if one appeared.
    fn wait_primary_failover(&self, replicaset: &str, timeout: Duration) -> BoxFuture<bool>;
}
