//! Backend connects with one overall deadline.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use shunt_core::Endpoint;

use crate::error::{NetError, NetResult};

/// Connect to a backend endpoint, trying every resolved address in
/// resolver order, within one overall deadline.
///
/// The returned stream has TCP_NODELAY set. A deadline expiry maps to
/// `NetError::TimedOut` so callers can apply quarantine policy; when
/// every candidate fails for another reason the last failure is
/// returned.
pub async fn connect(endpoint: &Endpoint, connect_timeout: Duration) -> NetResult<TcpStream> {
    let Endpoint::Tcp { host, port } = endpoint else {
        return Err(NetError::System(std::io::Error::other(
            "unix endpoints cannot be dialed as backends",
        )));
    };

    let deadline = Instant::now() + connect_timeout;

    let candidates = match timeout_at(deadline, tokio::net::lookup_host((host.as_str(), *port)))
        .await
    {
        Err(_) => return Err(NetError::TimedOut),
        Ok(Err(err)) => {
            debug!(%endpoint, error = %err, "name resolution failed");
            return Err(NetError::NameResolution(host.clone()));
        }
        Ok(Ok(addrs)) => addrs,
    };

    let mut last_err = NetError::NameResolution(host.clone());
    for addr in candidates {
        match timeout_at(deadline, TcpStream::connect(addr)).await {
            Err(_) => {
                debug!(%endpoint, %addr, "connect timed out");
                return Err(NetError::TimedOut);
            }
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).map_err(NetError::from)?;
                return Ok(stream);
            }
            Ok(Err(err)) => {
                debug!(%endpoint, %addr, error = %err, "connect failed");
                last_err = NetError::from(err);
            }
        }
    }

    Err(last_err)
}

/// Trivial reachability probe: connect and immediately drop the socket.
///
/// Used by the quarantine recovery loop; distinguishes only
/// reachable from not.
pub async fn probe(endpoint: &Endpoint, connect_timeout: Duration) -> bool {
    connect(endpoint, connect_timeout).await.is_ok()
}
