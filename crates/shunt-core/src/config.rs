//! shunt.toml configuration parser.
//!
//! One `[routing.NAME]` table per route. Parsing and validation happen
//! here, at startup, and are fatal on failure; the routing core only
//! ever sees already-validated `RouteConfig` values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::endpoint::{Endpoint, EndpointParseError};
use crate::types::{self, AccessMode, Protocol};

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no [routing.NAME] sections configured")]
    NoRoutes,

    #[error("routing section '{section}': {reason}")]
    Invalid { section: String, reason: String },
}

impl ConfigError {
    fn invalid(section: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section: section.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where a route sends its clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destinations {
    /// Fixed endpoint list, deduplicated by `(host, port)`.
    Static(Vec<Endpoint>),
    /// Role-filtered view of a replicaset via the cluster metadata cache.
    MetadataCache {
        replicaset: String,
        allow_primary_reads: bool,
    },
}

/// A fully validated routing instance configuration.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub name: String,
    /// TCP bind host and port; at least one of `bind` / `socket` is set.
    pub bind: Option<(String, u16)>,
    pub socket: Option<PathBuf>,
    pub mode: AccessMode,
    pub protocol: Protocol,
    pub destinations: Destinations,
    pub max_connections: usize,
    pub max_connect_errors: u64,
    pub client_connect_timeout: Duration,
    pub destination_connect_timeout: Duration,
    pub net_buffer_length: usize,
}

/// Raw deserialized form of the whole configuration file.
#[derive(Debug, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    routing: BTreeMap<String, RoutingSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoutingSection {
    bind_address: Option<String>,
    bind_port: Option<u16>,
    socket: Option<PathBuf>,
    destinations: String,
    mode: Option<String>,
    protocol: Option<String>,
    max_connections: Option<usize>,
    max_connect_errors: Option<u64>,
    client_connect_timeout: Option<u64>,
    destination_connect_timeout: Option<u64>,
    net_buffer_length: Option<usize>,
}

impl RouterConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate every section and produce the route configurations in
    /// section-name order.
    pub fn validate(self) -> ConfigResult<Vec<RouteConfig>> {
        if self.routing.is_empty() {
            return Err(ConfigError::NoRoutes);
        }
        self.routing
            .into_iter()
            .map(|(name, section)| section.validate(name))
            .collect()
    }
}

impl RoutingSection {
    fn validate(self, name: String) -> ConfigResult<RouteConfig> {
        let protocol = match self.protocol.as_deref() {
            None => Protocol::Classic,
            Some(value) => Protocol::parse(value).ok_or_else(|| {
                ConfigError::invalid(&name, format!("invalid protocol value '{value}'"))
            })?,
        };

        let mode = match self.mode.as_deref() {
            None => None,
            Some(value) => Some(AccessMode::parse(value).ok_or_else(|| {
                ConfigError::invalid(&name, format!("invalid mode value '{value}'"))
            })?),
        };

        let (destinations, mode) = parse_destinations(&name, &self.destinations, mode, protocol)?;

        // bind_address may carry its own port ("host:3307"); an explicit
        // bind_port wins over it.
        let bind = match (self.bind_address, self.bind_port) {
            (None, None) if self.socket.is_none() => {
                return Err(ConfigError::invalid(
                    &name,
                    "one of bind_address, bind_port, or socket is required",
                ));
            }
            (None, None) => None,
            (address, port) => {
                let address = address.unwrap_or_else(|| types::DEFAULT_BIND_ADDRESS.to_string());
                let parsed = Endpoint::parse(&address, port.unwrap_or(protocol.default_port()))
                    .map_err(|e: EndpointParseError| {
                        ConfigError::invalid(&name, e.to_string())
                    })?;
                let Endpoint::Tcp {
                    host,
                    port: addr_port,
                } = parsed
                else {
                    unreachable!("Endpoint::parse only yields TCP endpoints");
                };
                let port = port.unwrap_or(addr_port);
                if port == 0 {
                    return Err(ConfigError::invalid(&name, "bind_port must be 1-65535"));
                }
                Some((host, port))
            }
        };

        let max_connections = self
            .max_connections
            .unwrap_or(types::DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            return Err(ConfigError::invalid(&name, "max_connections must be >= 1"));
        }

        let destination_connect_timeout = Duration::from_secs(
            self.destination_connect_timeout
                .unwrap_or(types::DEFAULT_DESTINATION_CONNECT_TIMEOUT.as_secs()),
        );
        if destination_connect_timeout < Duration::from_secs(1) {
            return Err(ConfigError::invalid(
                &name,
                "destination_connect_timeout must be >= 1 second",
            ));
        }

        let client_connect_timeout = Duration::from_secs(
            self.client_connect_timeout
                .unwrap_or(types::DEFAULT_CLIENT_CONNECT_TIMEOUT.as_secs()),
        );

        Ok(RouteConfig {
            name,
            bind,
            socket: self.socket,
            mode,
            protocol,
            destinations,
            max_connections,
            max_connect_errors: self
                .max_connect_errors
                .unwrap_or(types::DEFAULT_MAX_CONNECT_ERRORS),
            client_connect_timeout,
            destination_connect_timeout,
            net_buffer_length: self
                .net_buffer_length
                .unwrap_or(types::DEFAULT_NET_BUFFER_LENGTH),
        })
    }
}

/// Parse the `destinations` key: either a comma-separated endpoint list
/// or a `metadata-cache://REPLICASET/default?role=...` URI.
fn parse_destinations(
    section: &str,
    value: &str,
    mode: Option<AccessMode>,
    protocol: Protocol,
) -> ConfigResult<(Destinations, AccessMode)> {
    if let Some(rest) = value.strip_prefix("metadata-cache://") {
        return parse_metadata_cache_uri(section, rest, mode);
    }

    let mut endpoints = Vec::new();
    for entry in value.split(',') {
        let endpoint = Endpoint::parse(entry, protocol.default_port())
            .map_err(|e| ConfigError::invalid(section, e.to_string()))?;
        // Dedup by (host, port) at insertion.
        if !endpoints.contains(&endpoint) {
            endpoints.push(endpoint);
        }
    }
    if endpoints.is_empty() {
        return Err(ConfigError::invalid(section, "destinations is empty"));
    }

    let mode = mode.ok_or_else(|| {
        ConfigError::invalid(section, "mode is required with a static destination list")
    })?;
    Ok((Destinations::Static(endpoints), mode))
}

fn parse_metadata_cache_uri(
    section: &str,
    rest: &str,
    mode: Option<AccessMode>,
) -> ConfigResult<(Destinations, AccessMode)> {
    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };
    let replicaset = location.split('/').next().unwrap_or("");
    if replicaset.is_empty() {
        return Err(ConfigError::invalid(
            section,
            "metadata-cache URI is missing the replicaset name",
        ));
    }

    let mut role = None;
    let mut allow_primary_reads = false;
    for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "role" => {
                role = Some(match value {
                    "PRIMARY" => AccessMode::ReadWrite,
                    "SECONDARY" => AccessMode::ReadOnly,
                    other => {
                        return Err(ConfigError::invalid(
                            section,
                            format!("invalid role value '{other}'"),
                        ));
                    }
                });
            }
            "allow_primary_reads" => {
                allow_primary_reads = value.eq_ignore_ascii_case("yes");
            }
            other => {
                return Err(ConfigError::invalid(
                    section,
                    format!("unknown metadata-cache URI option '{other}'"),
                ));
            }
        }
    }

    // The URI role and the section mode must agree when both are given.
    let mode = match (mode, role) {
        (Some(mode), Some(role)) if mode != role => {
            return Err(ConfigError::invalid(
                section,
                format!(
                    "mode '{}' conflicts with the role in destinations",
                    mode.name()
                ),
            ));
        }
        (Some(mode), _) => mode,
        (None, Some(role)) => role,
        (None, None) => {
            return Err(ConfigError::invalid(
                section,
                "mode is required when the metadata-cache URI has no role",
            ));
        }
    };

    if allow_primary_reads && mode != AccessMode::ReadOnly {
        warn!(section, "allow_primary_reads only works with read-only mode");
        allow_primary_reads = false;
    }

    Ok((
        Destinations::MetadataCache {
            replicaset: replicaset.to_string(),
            allow_primary_reads,
        },
        mode,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_route(content: &str) -> ConfigResult<RouteConfig> {
        RouterConfig::from_str(content)?
            .validate()
            .map(|mut routes| routes.remove(0))
    }

    #[test]
    fn parses_full_static_section() {
        let route = one_route(
            r#"
            [routing.rw]
            bind_address = "0.0.0.0"
            bind_port = 7001
            destinations = "db1:3306,db2:3306"
            mode = "read-write"
            protocol = "classic"
            max_connections = 64
            max_connect_errors = 5
            client_connect_timeout = 4
            destination_connect_timeout = 2
            net_buffer_length = 8192
            "#,
        )
        .unwrap();

        assert_eq!(route.name, "rw");
        assert_eq!(route.bind, Some(("0.0.0.0".to_string(), 7001)));
        assert_eq!(route.mode, AccessMode::ReadWrite);
        assert_eq!(route.protocol, Protocol::Classic);
        assert_eq!(
            route.destinations,
            Destinations::Static(vec![Endpoint::tcp("db1", 3306), Endpoint::tcp("db2", 3306)])
        );
        assert_eq!(route.max_connections, 64);
        assert_eq!(route.max_connect_errors, 5);
        assert_eq!(route.client_connect_timeout, Duration::from_secs(4));
        assert_eq!(route.destination_connect_timeout, Duration::from_secs(2));
        assert_eq!(route.net_buffer_length, 8192);
    }

    #[test]
    fn defaults_are_applied() {
        let route = one_route(
            r#"
            [routing.default]
            bind_port = 7001
            destinations = "db1"
            mode = "read-only"
            "#,
        )
        .unwrap();

        assert_eq!(route.bind, Some(("127.0.0.1".to_string(), 7001)));
        assert_eq!(route.protocol, Protocol::Classic);
        assert_eq!(route.max_connections, 512);
        assert_eq!(route.max_connect_errors, 100);
        assert_eq!(route.client_connect_timeout, Duration::from_secs(9));
        assert_eq!(route.destination_connect_timeout, Duration::from_secs(1));
        assert_eq!(route.net_buffer_length, 16 * 1024);
        assert_eq!(
            route.destinations,
            Destinations::Static(vec![Endpoint::tcp("db1", 3306)])
        );
    }

    #[test]
    fn x_protocol_changes_default_destination_port() {
        let route = one_route(
            r#"
            [routing.x]
            bind_port = 7002
            destinations = "db1"
            mode = "read-write"
            protocol = "x"
            "#,
        )
        .unwrap();
        assert_eq!(
            route.destinations,
            Destinations::Static(vec![Endpoint::tcp("db1", 33060)])
        );
    }

    #[test]
    fn bind_address_may_carry_port() {
        let route = one_route(
            r#"
            [routing.combined]
            bind_address = "10.0.0.1:7007"
            destinations = "db1"
            mode = "read-write"
            "#,
        )
        .unwrap();
        assert_eq!(route.bind, Some(("10.0.0.1".to_string(), 7007)));
    }

    #[test]
    fn static_destinations_are_deduplicated() {
        let route = one_route(
            r#"
            [routing.dup]
            bind_port = 7001
            destinations = "db1:3306,db1:3306,db2:3306"
            mode = "read-write"
            "#,
        )
        .unwrap();
        let Destinations::Static(endpoints) = route.destinations else {
            panic!("expected static destinations");
        };
        assert_eq!(endpoints.len(), 2);
    }

    #[test]
    fn metadata_cache_uri_derives_mode_from_role() {
        let route = one_route(
            r#"
            [routing.primary]
            bind_port = 7001
            destinations = "metadata-cache://rs1/default?role=PRIMARY"
            "#,
        )
        .unwrap();
        assert_eq!(route.mode, AccessMode::ReadWrite);
        assert_eq!(
            route.destinations,
            Destinations::MetadataCache {
                replicaset: "rs1".to_string(),
                allow_primary_reads: false,
            }
        );
    }

    #[test]
    fn metadata_cache_uri_allow_primary_reads() {
        let route = one_route(
            r#"
            [routing.ro]
            bind_port = 7001
            destinations = "metadata-cache://rs1/default?role=SECONDARY&allow_primary_reads=yes"
            "#,
        )
        .unwrap();
        assert_eq!(route.mode, AccessMode::ReadOnly);
        assert_eq!(
            route.destinations,
            Destinations::MetadataCache {
                replicaset: "rs1".to_string(),
                allow_primary_reads: true,
            }
        );
    }

    #[test]
    fn allow_primary_reads_ignored_for_read_write() {
        let route = one_route(
            r#"
            [routing.rw]
            bind_port = 7001
            destinations = "metadata-cache://rs1/default?role=PRIMARY&allow_primary_reads=yes"
            "#,
        )
        .unwrap();
        assert_eq!(
            route.destinations,
            Destinations::MetadataCache {
                replicaset: "rs1".to_string(),
                allow_primary_reads: false,
            }
        );
    }

    #[test]
    fn mode_role_conflict_is_rejected() {
        let err = one_route(
            r#"
            [routing.conflict]
            bind_port = 7001
            mode = "read-only"
            destinations = "metadata-cache://rs1/default?role=PRIMARY"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("conflicts"));
    }

    #[test]
    fn rejects_invalid_sections() {
        for (content, fragment) in [
            (
                r#"
                [routing.noport]
                destinations = "db1"
                mode = "read-write"
                "#,
                "bind_address",
            ),
            (
                r#"
                [routing.badmode]
                bind_port = 7001
                destinations = "db1"
                mode = "write-only"
                "#,
                "invalid mode",
            ),
            (
                r#"
                [routing.badproto]
                bind_port = 7001
                destinations = "db1"
                mode = "read-write"
                protocol = "udp"
                "#,
                "invalid protocol",
            ),
            (
                r#"
                [routing.nomode]
                bind_port = 7001
                destinations = "db1"
                "#,
                "mode is required",
            ),
            (
                r#"
                [routing.zeromax]
                bind_port = 7001
                destinations = "db1"
                mode = "read-write"
                max_connections = 0
                "#,
                "max_connections",
            ),
            (
                r#"
                [routing.shorttimeout]
                bind_port = 7001
                destinations = "db1"
                mode = "read-write"
                destination_connect_timeout = 0
                "#,
                "destination_connect_timeout",
            ),
        ] {
            let err = one_route(content).unwrap_err();
            assert!(
                err.to_string().contains(fragment),
                "expected '{fragment}' in '{err}'"
            );
        }
    }

    #[test]
    fn empty_file_is_rejected() {
        assert!(matches!(
            RouterConfig::from_str("").unwrap().validate(),
            Err(ConfigError::NoRoutes)
        ));
    }

    #[test]
    fn socket_only_section_is_accepted() {
        let route = one_route(
            r#"
            [routing.local]
            socket = "/tmp/shunt.sock"
            destinations = "db1"
            mode = "read-write"
            "#,
        )
        .unwrap();
        assert_eq!(route.bind, None);
        assert_eq!(route.socket, Some(PathBuf::from("/tmp/shunt.sock")));
    }
}
