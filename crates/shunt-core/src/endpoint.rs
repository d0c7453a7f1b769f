//! Backend endpoint addressing.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A malformed `host:port` destination entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("empty destination address")]
    Empty,

    #[error("invalid port in '{0}'")]
    InvalidPort(String),

    #[error("unterminated IPv6 literal in '{0}'")]
    UnterminatedV6(String),
}

/// A stable reference to a backend server.
///
/// Endpoints compare and hash by their full address, so destination
/// lists can be deduplicated by `(host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP address: DNS name or literal IP, plus port.
    Tcp { host: String, port: u16 },
    /// Local unix domain socket.
    Unix { path: PathBuf },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix { path: path.into() }
    }

    /// The TCP host, if this is a TCP endpoint.
    pub fn host(&self) -> Option<&str> {
        match self {
            Endpoint::Tcp { host, .. } => Some(host),
            Endpoint::Unix { .. } => None,
        }
    }

    /// Parse a `host:port`, `[v6-literal]:port`, or bare `host` entry.
    ///
    /// A bare host takes `default_port`. IPv6 literals must be wrapped
    /// in brackets when a port is attached.
    pub fn parse(entry: &str, default_port: u16) -> Result<Self, EndpointParseError> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(EndpointParseError::Empty);
        }

        if let Some(rest) = entry.strip_prefix('[') {
            let Some((host, tail)) = rest.split_once(']') else {
                return Err(EndpointParseError::UnterminatedV6(entry.to_string()));
            };
            let port = match tail.strip_prefix(':') {
                Some(p) => p
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| EndpointParseError::InvalidPort(entry.to_string()))?,
                None if tail.is_empty() => default_port,
                None => return Err(EndpointParseError::InvalidPort(entry.to_string())),
            };
            return Ok(Endpoint::tcp(host, port));
        }

        // A bare IPv6 literal without brackets has multiple colons; treat
        // the whole entry as a host in that case.
        if entry.matches(':').count() > 1 {
            return Ok(Endpoint::tcp(entry, default_port));
        }

        match entry.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| EndpointParseError::InvalidPort(entry.to_string()))?;
                Ok(Endpoint::tcp(host, port))
            }
            Some(_) => Err(EndpointParseError::Empty),
            None => Ok(Endpoint::tcp(entry, default_port)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "[{host}]:{port}")
            }
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix { path } => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            Endpoint::parse("db1.example.com:3307", 3306),
            Ok(Endpoint::tcp("db1.example.com", 3307))
        );
    }

    #[test]
    fn bare_host_takes_default_port() {
        assert_eq!(
            Endpoint::parse("db1", 3306),
            Ok(Endpoint::tcp("db1", 3306))
        );
    }

    #[test]
    fn parses_bracketed_v6() {
        assert_eq!(
            Endpoint::parse("[::1]:13306", 3306),
            Ok(Endpoint::tcp("::1", 13306))
        );
        assert_eq!(Endpoint::parse("[::1]", 3306), Ok(Endpoint::tcp("::1", 3306)));
    }

    #[test]
    fn bare_v6_takes_default_port() {
        assert_eq!(
            Endpoint::parse("fe80::1", 3306),
            Ok(Endpoint::tcp("fe80::1", 3306))
        );
    }

    #[test]
    fn rejects_bad_ports() {
        assert!(Endpoint::parse("db1:0", 3306).is_err());
        assert!(Endpoint::parse("db1:65536", 3306).is_err());
        assert!(Endpoint::parse("db1:abc", 3306).is_err());
        assert!(Endpoint::parse("[::1", 3306).is_err());
        assert!(Endpoint::parse("", 3306).is_err());
    }

    #[test]
    fn display_round_trip() {
        assert_eq!(Endpoint::tcp("db1", 3306).to_string(), "db1:3306");
        assert_eq!(Endpoint::tcp("::1", 3306).to_string(), "[::1]:3306");
    }

    #[test]
    fn compares_by_pair() {
        assert_eq!(Endpoint::tcp("a", 1), Endpoint::tcp("a", 1));
        assert_ne!(Endpoint::tcp("a", 1), Endpoint::tcp("a", 2));
        assert_ne!(Endpoint::tcp("a", 1), Endpoint::tcp("b", 1));
    }
}
