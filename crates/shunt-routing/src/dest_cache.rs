//! Metadata-cache-backed destination selection.
//!
//! The candidate list is materialized from a fresh cache snapshot on
//! every selection, filtered by the route's access mode, and walked
//! with a plain round-robin cursor. Cursor stability across snapshots
//! is best-effort: it is an integer taken modulo the current list
//! length.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use shunt_core::{AccessMode, Endpoint, Protocol};

use crate::destination::ConnectOutcome;
use crate::error::{SelectError, SelectResult};
use crate::metadata::{MetadataCache, ServerMode, ServerRole};

/// How long a read-write route waits for a new primary before giving
/// up on a client.
pub const PRIMARY_FAILOVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Role-filtered, cache-backed destination source for one route.
pub struct CacheDestinations {
    cache: Arc<dyn MetadataCache>,
    replicaset: String,
    mode: AccessMode,
    protocol: Protocol,
    allow_primary_reads: bool,
    failover_timeout: Duration,
    position: AtomicUsize,
    /// Endpoint to uuid mapping from the last materialized list, so a
    /// failed connect can be reported back by server identity.
    uuids: Mutex<HashMap<Endpoint, String>>,
}

impl std::fmt::Debug for CacheDestinations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDestinations")
            .field("replicaset", &self.replicaset)
            .field("mode", &self.mode)
            .field("protocol", &self.protocol)
            .field("allow_primary_reads", &self.allow_primary_reads)
            .field("failover_timeout", &self.failover_timeout)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl CacheDestinations {
    pub fn new(
        cache: Arc<dyn MetadataCache>,
        replicaset: impl Into<String>,
        mode: AccessMode,
        protocol: Protocol,
        allow_primary_reads: bool,
    ) -> Self {
        Self {
            cache,
            replicaset: replicaset.into(),
            mode,
            protocol,
            allow_primary_reads,
            failover_timeout: PRIMARY_FAILOVER_TIMEOUT,
            position: AtomicUsize::new(0),
            uuids: Mutex::new(HashMap::new()),
        }
    }

    /// Override the failover wait (for testing).
    pub fn with_failover_timeout(mut self, timeout: Duration) -> Self {
        self.failover_timeout = timeout;
        self
    }

    /// Materialize the current candidate list from a fresh snapshot.
    fn candidates(&self) -> Vec<Endpoint> {
        let instances = self.cache.lookup(&self.replicaset);

        let mut uuids = self.uuids.lock().expect("uuid map lock");
        uuids.clear();

        let mut out = Vec::new();
        for instance in instances {
            let eligible = match self.mode {
                AccessMode::ReadWrite => {
                    instance.role == ServerRole::Primary && instance.mode == ServerMode::ReadWrite
                }
                AccessMode::ReadOnly => {
                    (instance.role == ServerRole::Secondary
                        && instance.mode == ServerMode::ReadOnly)
                        || (self.allow_primary_reads && instance.mode == ServerMode::ReadWrite)
                }
            };
            if !eligible {
                continue;
            }
            let port = match self.protocol {
                Protocol::Classic => instance.classic_port,
                Protocol::X => instance.x_port,
            };
            let endpoint = Endpoint::tcp(instance.host, port);
            uuids.insert(endpoint.clone(), instance.uuid);
            out.push(endpoint);
        }
        out
    }

    /// Number of candidates in the current snapshot.
    pub fn candidate_count(&self) -> usize {
        self.candidates().len()
    }

    /// Next backend from the current snapshot.
    ///
    /// A read-write route with no primary waits once for a failover
    /// before reporting exhaustion.
    pub async fn next(&self) -> SelectResult<Endpoint> {
        let mut waited = false;
        loop {
            let candidates = self.candidates();
            if candidates.is_empty() {
                if self.mode == AccessMode::ReadWrite && !waited {
                    warn!(
                        replicaset = %self.replicaset,
                        "no available RW servers, waiting for primary failover"
                    );
                    if self
                        .cache
                        .wait_primary_failover(&self.replicaset, self.failover_timeout)
                        .await
                    {
                        info!(
                            replicaset = %self.replicaset,
                            "retrying selection after possible failover"
                        );
                        waited = true;
                        continue;
                    }
                }
                return Err(SelectError::ExhaustedTemporarily);
            }

            let idx = self.position.fetch_add(1, Ordering::Relaxed) % candidates.len();
            return Ok(candidates[idx].clone());
        }
    }

    /// Report a connect outcome so the cache can accelerate its own
    /// re-probe of an unreachable member.
    pub fn report_connect_result(&self, endpoint: &Endpoint, outcome: ConnectOutcome) {
        if outcome == ConnectOutcome::Connected {
            return;
        }
        let uuid = self.uuids.lock().expect("uuid map lock").get(endpoint).cloned();
        if let Some(uuid) = uuid {
            debug!(%endpoint, uuid, "reporting instance unreachable");
            self.cache.mark_unreachable(&uuid);
        }
    }
}
