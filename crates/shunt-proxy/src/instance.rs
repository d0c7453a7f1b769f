//! A routing instance: one named listener and its accept loop.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use shunt_core::config::{Destinations, RouteConfig};
use shunt_routing::{
    CacheDestinations, ClientBlocklist, DestinationSelector, MetadataCache, StaticDestinations,
};

use crate::error::{ProxyError, ProxyResult};
use crate::forwarder::{self, RouteState};

const LISTEN_BACKLOG: u32 = 128;

/// How long `stop` waits for in-flight workers before detaching them.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One configured route: its listeners, accept loops, selector,
/// blocklist, and live connection workers.
#[derive(Debug)]
pub struct RoutingInstance {
    state: Arc<RouteState>,
    tcp_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    accept_handles: Vec<JoinHandle<()>>,
    probe_handle: Option<JoinHandle<()>>,
}

impl RoutingInstance {
    /// Bind the route's listeners and start accepting.
    ///
    /// `metadata` is required for routes with metadata-cache
    /// destinations and ignored otherwise.
    pub async fn start(
        config: RouteConfig,
        metadata: Option<Arc<dyn MetadataCache>>,
    ) -> ProxyResult<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut probe_handle = None;
        let selector = match &config.destinations {
            Destinations::Static(endpoints) => {
                let destinations = StaticDestinations::new(endpoints.clone());
                probe_handle = Some(destinations.start_probe(shutdown_rx.clone()));
                DestinationSelector::Static(destinations)
            }
            Destinations::MetadataCache {
                replicaset,
                allow_primary_reads,
            } => {
                let cache = metadata.ok_or_else(|| ProxyError::Route {
                    route: config.name.clone(),
                    reason: "metadata-cache destinations require a metadata cache handle"
                        .to_string(),
                })?;
                DestinationSelector::MetadataCache(CacheDestinations::new(
                    cache,
                    replicaset.clone(),
                    config.mode,
                    config.protocol,
                    *allow_primary_reads,
                ))
            }
        };

        let blocklist = ClientBlocklist::new(config.max_connect_errors);
        let state = Arc::new(RouteState {
            config,
            selector,
            blocklist,
            active: AtomicUsize::new(0),
        });

        let mut accept_handles = Vec::new();
        let mut tcp_addr = None;

        if let Some((host, port)) = &state.config.bind {
            let listener = shunt_net::listen_tcp(host, *port, LISTEN_BACKLOG)
                .await
                .map_err(|source| ProxyError::Bind {
                    route: state.config.name.clone(),
                    source,
                })?;
            tcp_addr = Some(listener.local_addr().map_err(|err| ProxyError::Bind {
                route: state.config.name.clone(),
                source: err.into(),
            })?);
            accept_handles.push(tokio::spawn(accept_loop_tcp(
                listener,
                state.clone(),
                shutdown_rx.clone(),
            )));
        }

        #[cfg(unix)]
        if let Some(path) = &state.config.socket {
            let listener =
                shunt_net::listen_unix(path).map_err(|source| ProxyError::Bind {
                    route: state.config.name.clone(),
                    source,
                })?;
            accept_handles.push(tokio::spawn(accept_loop_unix(
                listener,
                state.clone(),
                shutdown_rx.clone(),
            )));
        }

        info!(
            route = %state.config.name,
            mode = state.config.mode.name(),
            protocol = state.config.protocol.name(),
            "route started"
        );

        Ok(Self {
            state,
            tcp_addr,
            shutdown_tx,
            accept_handles,
            probe_handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.state.config.name
    }

    /// The bound TCP address, useful when the configuration asked for
    /// an ephemeral port.
    pub fn tcp_local_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Number of connections currently being serviced.
    pub fn active_connections(&self) -> usize {
        self.state.active.load(Ordering::Relaxed)
    }

    /// Hosts this route is refusing, for administrative inspection.
    pub fn blocked_hosts(&self) -> Vec<IpAddr> {
        self.state.blocklist.blocked_hosts()
    }

    /// Stop accepting, cancel in-flight workers, and join everything
    /// within the shutdown deadline.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.accept_handles {
            let _ = handle.await;
        }
        if let Some(probe) = self.probe_handle {
            let _ = probe.await;
        }
        #[cfg(unix)]
        if let Some(path) = &self.state.config.socket {
            let _ = std::fs::remove_file(path);
        }
        info!(route = %self.state.config.name, "route stopped");
    }
}

/// Reserve an admission slot. The counter is incremented for every
/// accepted connection, admitted or not, and the worker decrements it
/// on the way out.
fn admit(state: &RouteState) -> bool {
    let previous = state.active.fetch_add(1, Ordering::Relaxed);
    previous < state.config.max_connections
}

async fn accept_loop_tcp(
    listener: TcpListener,
    state: Arc<RouteState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    let admitted = admit(&state);
                    workers.spawn(forwarder::handle_client(
                        state.clone(),
                        stream,
                        Some(peer.ip()),
                        admitted,
                    ));
                }
                Err(err) => {
                    // Transient accept failures must not kill the route.
                    warn!(route = %state.config.name, error = %err, "accept failed");
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    drop(listener);
    join_workers(&state.config.name, workers).await;
}

#[cfg(unix)]
async fn accept_loop_unix(
    listener: tokio::net::UnixListener,
    state: Arc<RouteState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, _)) => {
                    let admitted = admit(&state);
                    // Unix-socket peers have no IP to count against;
                    // the blocklist never sees them.
                    workers.spawn(forwarder::handle_client(state.clone(), stream, None, admitted));
                }
                Err(err) => {
                    warn!(route = %state.config.name, error = %err, "accept failed");
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    drop(listener);
    join_workers(&state.config.name, workers).await;
}

/// Cancel every worker (dropping a worker closes both of its
/// sockets) and reap them within the join deadline. Stragglers are
/// detached with a warning.
async fn join_workers(route: &str, mut workers: JoinSet<()>) {
    workers.abort_all();
    let drained = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(route, stragglers = workers.len(), "workers did not stop in time, detaching");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use shunt_core::types::AccessMode;
    use shunt_core::{Endpoint, Protocol};

    fn route_config(name: &str, bind_port: u16, destinations: Vec<Endpoint>) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            bind: Some(("127.0.0.1".to_string(), bind_port)),
            socket: None,
            mode: AccessMode::ReadWrite,
            protocol: Protocol::Classic,
            destinations: Destinations::Static(destinations),
            max_connections: 8,
            max_connect_errors: 100,
            client_connect_timeout: Duration::from_secs(2),
            destination_connect_timeout: Duration::from_secs(1),
            net_buffer_length: 16 * 1024,
        }
    }

    #[tokio::test]
    async fn starts_and_stops() {
        let config = route_config("lifecycle", 0, vec![Endpoint::tcp("127.0.0.1", 1)]);
        let instance = RoutingInstance::start(config, None).await.unwrap();

        assert_eq!(instance.name(), "lifecycle");
        assert!(instance.tcp_local_addr().unwrap().port() > 0);
        assert_eq!(instance.active_connections(), 0);
        assert!(instance.blocked_hosts().is_empty());

        instance.stop().await;
    }

    #[tokio::test]
    async fn bind_failure_surfaces() {
        // TEST-NET-3 is never a local interface address.
        let mut config = route_config("nobind", 0, vec![Endpoint::tcp("127.0.0.1", 1)]);
        config.bind = Some(("203.0.113.1".to_string(), 0));

        let err = RoutingInstance::start(config, None).await.unwrap_err();
        assert!(matches!(err, ProxyError::Bind { .. }));
    }

    #[tokio::test]
    async fn metadata_cache_destinations_require_a_cache() {
        let mut config = route_config("nocache", 0, Vec::new());
        config.destinations = Destinations::MetadataCache {
            replicaset: "rs1".to_string(),
            allow_primary_reads: false,
        };

        let err = RoutingInstance::start(config, None).await.unwrap_err();
        assert!(matches!(err, ProxyError::Route { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_socket_is_removed_on_stop() {
        let dir = std::env::temp_dir().join(format!("shunt-instance-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("route.sock");

        let mut config = route_config("local", 0, vec![Endpoint::tcp("127.0.0.1", 1)]);
        config.bind = None;
        config.socket = Some(path.clone());

        let instance = RoutingInstance::start(config, None).await.unwrap();
        assert!(path.exists());

        instance.stop().await;
        assert!(!path.exists());
        let _ = std::fs::remove_dir(&dir);
    }
}
