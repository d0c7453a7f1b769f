//! Static destination list with failure quarantine.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use shunt_core::Endpoint;

use crate::error::{SelectError, SelectResult};

/// Cadence of the quarantine recovery loop.
const PROBE_INTERVAL: Duration = Duration::from_secs(3);

/// Connect timeout for recovery probes.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// What the forwarder observed when it dialed an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Refused, timed out, or unroutable; quarantine material.
    Unreachable,
}

/// Round-robin over a fixed endpoint list, skipping quarantined
/// entries.
///
/// Cheap to clone; every clone shares the cursor and quarantine set.
/// Quarantine can never starve the list: the background probe keeps
/// running until every quarantined endpoint accepts a connection
/// again.
#[derive(Clone, Debug)]
pub struct StaticDestinations {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    destinations: Vec<Endpoint>,
    state: Mutex<SelectState>,
    probe_wakeup: Notify,
    probe_interval: Duration,
    probe_connect_timeout: Duration,
}

#[derive(Default, Debug)]
struct SelectState {
    cursor: usize,
    /// Indices into `destinations`; always a subset of its index
    /// domain.
    quarantined: HashSet<usize>,
}

impl StaticDestinations {
    /// Build from a configured endpoint list. Duplicates are removed
    /// by `(host, port)` at insertion.
    pub fn new(destinations: Vec<Endpoint>) -> Self {
        let mut deduped: Vec<Endpoint> = Vec::with_capacity(destinations.len());
        for endpoint in destinations {
            if !deduped.contains(&endpoint) {
                deduped.push(endpoint);
            }
        }
        Self {
            inner: Arc::new(Inner {
                destinations: deduped,
                state: Mutex::new(SelectState::default()),
                probe_wakeup: Notify::new(),
                probe_interval: PROBE_INTERVAL,
                probe_connect_timeout: PROBE_CONNECT_TIMEOUT,
            }),
        }
    }

    /// Override the probe cadence (for testing). Must be called
    /// before the selector is cloned or the probe is started.
    pub fn with_probe_timing(mut self, interval: Duration, connect_timeout: Duration) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("probe timing set before sharing");
        inner.probe_interval = interval;
        inner.probe_connect_timeout = connect_timeout;
        self
    }

    /// Number of configured destinations after deduplication.
    pub fn len(&self) -> usize {
        self.inner.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.destinations.is_empty()
    }

    /// Number of destinations currently quarantined.
    pub fn quarantine_len(&self) -> usize {
        self.inner.state.lock().expect("selector lock").quarantined.len()
    }

    /// Next backend: the first non-quarantined endpoint at or after
    /// the cursor, wrapping around. Advances the cursor past the
    /// returned entry.
    pub fn next(&self) -> SelectResult<Endpoint> {
        let n = self.inner.destinations.len();
        if n == 0 {
            return Err(SelectError::ExhaustedPermanent);
        }

        let mut state = self.inner.state.lock().expect("selector lock");
        for offset in 0..n {
            let idx = (state.cursor + offset) % n;
            if state.quarantined.contains(&idx) {
                continue;
            }
            state.cursor = (idx + 1) % n;
            return Ok(self.inner.destinations[idx].clone());
        }
        debug!("no more destinations: all quarantined");
        Err(SelectError::ExhaustedTemporarily)
    }

    /// Record a connect outcome. Unreachable endpoints enter
    /// quarantine and the probe task is woken.
    pub fn report_connect_result(&self, endpoint: &Endpoint, outcome: ConnectOutcome) {
        if outcome == ConnectOutcome::Connected {
            return;
        }
        let Some(idx) = self.inner.destinations.iter().position(|d| d == endpoint) else {
            return;
        };
        let mut state = self.inner.state.lock().expect("selector lock");
        if state.quarantined.insert(idx) {
            info!(%endpoint, "quarantining destination");
            self.inner.probe_wakeup.notify_one();
        }
    }

    /// Spawn the quarantine recovery loop.
    ///
    /// Sleeps until the quarantine set becomes non-empty, then
    /// re-probes each entry with a short-timeout connect every probe
    /// interval. Probe failures are expected and never fatal.
    pub fn start_probe(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let quarantined: Vec<usize> = {
                    let state = inner.state.lock().expect("selector lock");
                    state.quarantined.iter().copied().collect()
                };

                if quarantined.is_empty() {
                    tokio::select! {
                        _ = inner.probe_wakeup.notified() => continue,
                        _ = shutdown.changed() => break,
                    }
                }

                for idx in quarantined {
                    let endpoint = inner.destinations[idx].clone();
                    if shunt_net::probe(&endpoint, inner.probe_connect_timeout).await {
                        let mut state = inner.state.lock().expect("selector lock");
                        if state.quarantined.remove(&idx) {
                            info!(%endpoint, "destination recovered, leaving quarantine");
                        }
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(inner.probe_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}
