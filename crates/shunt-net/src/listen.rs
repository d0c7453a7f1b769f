//! Listener setup for routing instances.

use tokio::net::{TcpListener, TcpSocket};
use tracing::info;

use crate::error::{NetError, NetResult};

/// Bind a TCP listener with the given backlog.
///
/// The address must be a literal IP; listener addresses are resolved
/// by the configuration layer before they get here.
pub async fn listen_tcp(host: &str, port: u16, backlog: u32) -> NetResult<TcpListener> {
    let addr: std::net::SocketAddr = tokio::net::lookup_host((host, port))
        .await
        .map_err(NetError::from)?
        .next()
        .ok_or_else(|| NetError::NameResolution(host.to_string()))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(NetError::from)?;
    socket.set_reuseaddr(true).map_err(NetError::from)?;
    socket.bind(addr).map_err(NetError::from)?;

    let listener = socket.listen(backlog).map_err(NetError::from)?;
    info!(addr = %listener.local_addr().map_err(NetError::from)?, "listening");
    Ok(listener)
}

/// Bind a unix-socket listener at `path`.
///
/// A stale socket file is removed only after demonstrating that no
/// live listener is bound to it. The socket file is made
/// world-accessible (mode 0777), mirroring the server's local-socket
/// convention so any local user may connect. The parent directory
/// must already exist.
#[cfg(unix)]
pub fn listen_unix(path: &std::path::Path) -> NetResult<tokio::net::UnixListener> {
    use std::io;
    use std::os::unix::fs::PermissionsExt;

    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => {
            return Err(NetError::System(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("socket {} is in use by another process", path.display()),
            )));
        }
        Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
            // Bound once but nobody is listening anymore: stale.
            std::fs::remove_file(path).map_err(NetError::from)?;
            info!(path = %path.display(), "removed stale socket file");
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(NetError::from(err)),
    }

    let listener = tokio::net::UnixListener::bind(path).map_err(NetError::from)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
        .map_err(NetError::from)?;
    info!(path = %path.display(), "listening on unix socket");
    Ok(listener)
}
