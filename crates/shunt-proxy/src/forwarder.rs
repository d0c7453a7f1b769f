//! Per-connection forwarding state machine.
//!
//! For each accepted client: admission, backend selection, handshake
//! inspection through the protocol adapter, then a pure byte shuttle
//! until either side closes. A connection that reaches the shuttle
//! phase can no longer be attributed a handshake failure, however it
//! ends.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use shunt_core::config::RouteConfig;
use shunt_core::types::DEFAULT_WAIT_TIMEOUT;
use shunt_core::{Endpoint, Protocol};
use shunt_routing::{ClientBlocklist, ConnectOutcome, DestinationSelector};
use shunt_wire::classic::{self, ClassicHandshake};
use shunt_wire::xproto::{self, XHandshake};
use shunt_wire::{Direction, HandshakePhase, WireError};

/// Everything a worker shares with its routing instance.
#[derive(Debug)]
pub(crate) struct RouteState {
    pub(crate) config: RouteConfig,
    pub(crate) selector: DestinationSelector,
    pub(crate) blocklist: ClientBlocklist,
    pub(crate) active: AtomicUsize,
}

/// Per-connection protocol adapter, fixed at listener configuration
/// time.
enum ProtocolAdapter {
    Classic(ClassicHandshake),
    X(XHandshake),
}

impl ProtocolAdapter {
    fn new(protocol: Protocol, max_buffered: usize) -> Self {
        match protocol {
            Protocol::Classic => ProtocolAdapter::Classic(ClassicHandshake::new(max_buffered)),
            Protocol::X => ProtocolAdapter::X(XHandshake::new(max_buffered)),
        }
    }

    fn feed(&mut self, dir: Direction, data: &[u8]) -> Result<HandshakePhase, WireError> {
        match self {
            ProtocolAdapter::Classic(hs) => hs.feed(dir, data),
            ProtocolAdapter::X(hs) => hs.feed(dir, data),
        }
    }
}

fn build_client_error(protocol: Protocol, code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    match protocol {
        Protocol::Classic => classic::build_error(code, sql_state, message),
        Protocol::X => xproto::build_error(code, sql_state, message),
    }
}

/// The message that makes a backend account a refused client as an
/// auth failure instead of an aborted connect.
fn neutralizer(protocol: Protocol) -> Vec<u8> {
    match protocol {
        Protocol::Classic => classic::build_fake_handshake_response(),
        Protocol::X => xproto::build_capabilities_get(),
    }
}

/// Service one accepted client connection to completion.
///
/// `admitted` is decided by the accept loop against the admission
/// cap; the active-connection counter was already incremented for
/// this connection and is decremented here on the way out.
pub(crate) async fn handle_client<S>(
    state: Arc<RouteState>,
    client: S,
    client_addr: Option<IpAddr>,
    admitted: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    run_connection(&state, client, client_addr, admitted).await;
    state.active.fetch_sub(1, Ordering::Relaxed);
}

async fn run_connection<S>(
    state: &RouteState,
    mut client: S,
    client_addr: Option<IpAddr>,
    admitted: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let cfg = &state.config;
    let route = cfg.name.as_str();

    if !admitted {
        info!(route, client = ?client_addr, "refusing connection: too many connections");
        send_client_error(
            &mut client,
            cfg.protocol,
            1040,
            "HY000",
            "Too many connections to MySQL Router",
        )
        .await;
        return;
    }

    if let Some(addr) = client_addr {
        if state.blocklist.is_blocked(addr) {
            debug!(route, client = %addr, "refusing connection from blocked host");
            let message = format!("Host '{addr}' is blocked because of many connection errors");
            send_client_error(&mut client, cfg.protocol, 1129, "HY000", &message).await;
            return;
        }
    }

    // Backend selection: walk the selector, quarantining failures,
    // bounded by the destination count at entry.
    let mut last_tried: Option<Endpoint> = None;
    let mut remaining = state.selector.attempt_cap();
    let connected = loop {
        if remaining == 0 {
            break None;
        }
        remaining -= 1;

        let endpoint = match state.selector.next_backend().await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                debug!(route, %err, "no backend available");
                break None;
            }
        };
        match shunt_net::connect(&endpoint, cfg.destination_connect_timeout).await {
            Ok(stream) => {
                state
                    .selector
                    .report_connect_result(&endpoint, ConnectOutcome::Connected);
                break Some((stream, endpoint));
            }
            Err(err) => {
                warn!(route, %endpoint, %err, "backend connect failed");
                if err.is_unreachable() {
                    state
                        .selector
                        .report_connect_result(&endpoint, ConnectOutcome::Unreachable);
                }
                last_tried = Some(endpoint);
            }
        }
    };

    let Some((server, endpoint)) = connected else {
        let target = last_tried
            .map(|endpoint| endpoint.to_string())
            .unwrap_or_else(|| route.to_string());
        let message = format!("Can't connect to remote MySQL server on '{target}'");
        send_client_error(&mut client, cfg.protocol, 2003, "HY000", &message).await;
        return;
    };

    debug!(route, client = ?client_addr, backend = %endpoint, "connection established");

    let (mut cr, mut cw) = tokio::io::split(client);
    let (mut sr, mut sw) = tokio::io::split(server);

    let mut adapter = ProtocolAdapter::new(cfg.protocol, cfg.net_buffer_length);
    let mut cbuf = vec![0u8; cfg.net_buffer_length];
    let mut sbuf = vec![0u8; cfg.net_buffer_length];
    let mut bytes_up: u64 = 0;
    let mut bytes_down: u64 = 0;

    // Handshake phase: inspect-then-forward until the adapter says
    // the handshake is complete. The deadline guards inactivity in
    // either direction.
    loop {
        let event = timeout(cfg.client_connect_timeout, async {
            tokio::select! {
                r = cr.read(&mut cbuf[..]) => (Direction::FromClient, r),
                r = sr.read(&mut sbuf[..]) => (Direction::FromServer, r),
            }
        })
        .await;

        let (dir, read) = match event {
            Ok(pair) => pair,
            Err(_) => {
                debug!(route, client = ?client_addr, "handshake timed out");
                fail_handshake(state, client_addr, &mut sw).await;
                return;
            }
        };

        let n = match read {
            Ok(0) => {
                debug!(route, ?dir, "connection closed during handshake");
                fail_handshake(state, client_addr, &mut sw).await;
                return;
            }
            Err(err) => {
                debug!(route, ?dir, error = %err, "read failed during handshake");
                fail_handshake(state, client_addr, &mut sw).await;
                return;
            }
            Ok(n) => n,
        };

        let data: &[u8] = match dir {
            Direction::FromClient => &cbuf[..n],
            Direction::FromServer => &sbuf[..n],
        };

        let phase = match adapter.feed(dir, data) {
            Ok(phase) => phase,
            Err(violation) => {
                warn!(route, client = ?client_addr, %violation, "handshake protocol violation");
                fail_handshake(state, client_addr, &mut sw).await;
                return;
            }
        };

        let written = match dir {
            Direction::FromClient => {
                bytes_up += n as u64;
                sw.write_all(data).await
            }
            Direction::FromServer => {
                bytes_down += n as u64;
                cw.write_all(data).await
            }
        };
        if let Err(err) = written {
            debug!(route, ?dir, error = %err, "write failed during handshake");
            fail_handshake(state, client_addr, &mut sw).await;
            return;
        }

        if phase == HandshakePhase::Complete {
            break;
        }
    }

    // Byte-shuttle phase: no inspection, no failure attribution.
    run_shuttle(
        &mut cr,
        &mut cw,
        &mut sr,
        &mut sw,
        &mut cbuf,
        &mut sbuf,
        &mut bytes_up,
        &mut bytes_down,
    )
    .await;

    debug!(route, client = ?client_addr, backend = %endpoint, bytes_up, bytes_down, "session closed");
}

/// Attribute a handshake failure to the client host. Exactly when the
/// failure crosses the blocking threshold, the backend gets the
/// protocol's neutralizer message before everything closes.
async fn fail_handshake<W>(state: &RouteState, client_addr: Option<IpAddr>, server: &mut W)
where
    W: AsyncWrite + Unpin,
{
    let Some(addr) = client_addr else {
        return;
    };
    if state.blocklist.record_handshake_failure(addr) {
        warn!(
            route = %state.config.name,
            client = %addr,
            "blocking client host after repeated connection errors"
        );
        let message = neutralizer(state.config.protocol);
        if server.write_all(&message).await.is_ok() {
            let _ = server.flush().await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_shuttle<CR, CW, SR, SW>(
    cr: &mut CR,
    cw: &mut CW,
    sr: &mut SR,
    sw: &mut SW,
    cbuf: &mut [u8],
    sbuf: &mut [u8],
    bytes_up: &mut u64,
    bytes_down: &mut u64,
) where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    SR: AsyncRead + Unpin,
    SW: AsyncWrite + Unpin,
{
    loop {
        let event = timeout(DEFAULT_WAIT_TIMEOUT, async {
            tokio::select! {
                r = cr.read(&mut cbuf[..]) => (Direction::FromClient, r),
                r = sr.read(&mut sbuf[..]) => (Direction::FromServer, r),
            }
        })
        .await;

        match event {
            Err(_) => {
                debug!("session idle timeout");
                break;
            }
            Ok((Direction::FromClient, Ok(0))) => {
                // Propagate the half-close and drain the other side.
                let _ = sw.shutdown().await;
                drain(sr, cw, sbuf, bytes_down).await;
                break;
            }
            Ok((Direction::FromServer, Ok(0))) => {
                let _ = cw.shutdown().await;
                drain(cr, sw, cbuf, bytes_up).await;
                break;
            }
            Ok((Direction::FromClient, Ok(n))) => {
                *bytes_up += n as u64;
                if sw.write_all(&cbuf[..n]).await.is_err() {
                    break;
                }
            }
            Ok((Direction::FromServer, Ok(n))) => {
                *bytes_down += n as u64;
                if cw.write_all(&sbuf[..n]).await.is_err() {
                    break;
                }
            }
            Ok((dir, Err(err))) => {
                debug!(?dir, error = %err, "shuttle read failed");
                break;
            }
        }
    }
}

/// Forward the remaining bytes of one direction after the opposite
/// peer half-closed, then close this direction too.
async fn drain<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8], counter: &mut u64)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match timeout(DEFAULT_WAIT_TIMEOUT, reader.read(buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => {
                *counter += n as u64;
                if writer.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Write a protocol-appropriate error packet to the client and close
/// the connection. Write failures only get a debug line; the client
/// is being turned away either way.
async fn send_client_error<S>(
    client: &mut S,
    protocol: Protocol,
    code: u16,
    sql_state: &str,
    message: &str,
) where
    S: AsyncWrite + Unpin,
{
    let packet = build_client_error(protocol, code, sql_state, message);
    if let Err(err) = client.write_all(&packet).await {
        debug!(code, error = %err, "failed to deliver error to client");
    }
    let _ = client.flush().await;
    let _ = client.shutdown().await;
}
