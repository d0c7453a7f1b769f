//! Classic protocol handshake inspection and packet builders.
//!
//! A classic packet is a 4-byte header (3-byte little-endian payload
//! length, 1-byte sequence id) followed by the payload. During the
//! handshake the server greets with seq 0, the client replies with
//! seq 1, and a seq >= 2 packet from the client means authentication
//! is underway and inspection can stop. A client reply that asks for
//! TLS moves the rest of the handshake out of plaintext, so the
//! adapter also stops there.

use crate::codec;
use crate::error::{WireError, WireResult};
use crate::{Direction, HandshakePhase};

/// Classic packet header length.
pub const HEADER_SIZE: usize = 4;

/// First payload byte of an ERR packet.
pub const ERR_MARKER: u8 = 0xFF;

/// CLIENT_SSL capability bit: the client wants to switch to TLS.
pub const CLIENT_SSL: u32 = 0x0800;

/// CLIENT_PROTOCOL_41 capability bit: 4.1 protocol framing, which
/// puts a SQL state into ERR packets.
pub const CLIENT_PROTOCOL_41: u32 = 0x0200;

// Fields of the fake handshake response, matching what the server
// expects from a well-formed but unauthenticatable client.
const FAKE_CLIENT_CAPABILITIES: u32 = 238221;
const MAX_ALLOWED_PACKET: u32 = 1 << 30;
const FAKE_USERNAME: &str = "ROUTER";
const FAKE_SCHEMA: &str = "fake_router_login";
const FAKE_AUTH_PLUGIN: &str = "mysql_native_password";

/// Per-connection handshake tracker for the classic protocol.
///
/// Partial frames are buffered across `feed` calls; each direction
/// has its own buffer so interleaved reads cannot corrupt framing.
#[derive(Debug)]
pub struct ClassicHandshake {
    client_buf: Vec<u8>,
    server_buf: Vec<u8>,
    last_seq: Option<u8>,
    max_buffered: usize,
    done: bool,
}

impl ClassicHandshake {
    /// `max_buffered` bounds how much of a partial handshake packet
    /// the adapter will hold per direction; a frame that cannot fit
    /// is treated as hostile.
    pub fn new(max_buffered: usize) -> Self {
        Self {
            client_buf: Vec::new(),
            server_buf: Vec::new(),
            last_seq: None,
            max_buffered,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed bytes observed on the wire in the given direction.
    ///
    /// Returns the handshake phase after consuming every complete
    /// packet in the buffer, or a `WireError` for a violation that
    /// must abort the connection.
    pub fn feed(&mut self, dir: Direction, data: &[u8]) -> WireResult<HandshakePhase> {
        if self.done {
            return Ok(HandshakePhase::Complete);
        }

        let max = self.max_buffered;
        {
            let buf = self.buffer_mut(dir);
            let len = buf.len().saturating_add(data.len());
            if len > max {
                return Err(WireError::Oversize { len, max });
            }
            buf.extend_from_slice(data);
        }

        while !self.done {
            let frame = {
                let buf = self.buffer_mut(dir);
                if buf.len() < HEADER_SIZE {
                    break;
                }
                let payload_len = codec::get_fixed_le(buf, 3)? as usize;
                let total = HEADER_SIZE + payload_len;
                if total > max {
                    return Err(WireError::Oversize { len: total, max });
                }
                if buf.len() < total {
                    break;
                }
                buf.drain(..total).collect::<Vec<u8>>()
            };
            self.inspect(dir, &frame)?;
        }

        Ok(if self.done {
            HandshakePhase::Complete
        } else {
            HandshakePhase::InProgress
        })
    }

    fn inspect(&mut self, dir: Direction, frame: &[u8]) -> WireResult<()> {
        let seq = frame[3];
        let payload = &frame[HEADER_SIZE..];

        match self.last_seq {
            Some(last) => {
                let expected = last.wrapping_add(1);
                if seq != expected && seq != expected.wrapping_add(1) {
                    return Err(WireError::OutOfSequence { expected, got: seq });
                }
            }
            // The first packet on the wire is the server greeting
            // (seq 0); tolerate a client that races it with seq 1.
            None if seq > 1 => {
                return Err(WireError::OutOfSequence {
                    expected: 0,
                    got: seq,
                });
            }
            None => {}
        }
        self.last_seq = Some(seq);

        if dir == Direction::FromServer {
            if payload.first() == Some(&ERR_MARKER) {
                // Server-originated error: forwarded to the client,
                // not attributed to anyone. Inspection ends here.
                self.done = true;
            }
        } else if seq == 1 {
            let capabilities = codec::get_fixed_le(payload, 4)? as u32;
            if capabilities & CLIENT_SSL != 0 {
                // The handshake restarts under TLS; nothing more is
                // plaintext-visible.
                self.done = true;
                return Ok(());
            }
        }

        // A seq >= 2 packet in either direction means authentication
        // payloads are flowing; the sequence resets to 0 on the next
        // client command, so inspection must stop here.
        if seq >= 2 {
            self.done = true;
        }
        Ok(())
    }

    fn buffer_mut(&mut self, dir: Direction) -> &mut Vec<u8> {
        match dir {
            Direction::FromClient => &mut self.client_buf,
            Direction::FromServer => &mut self.server_buf,
        }
    }
}

/// Build a classic ERR packet with seq 0, as if it came from the
/// backend itself.
pub fn build_error(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let state = if sql_state.len() == 5 { sql_state } else { "HY000" };

    let mut packet = vec![0u8; HEADER_SIZE];
    packet.push(ERR_MARKER);
    codec::put_fixed_le(&mut packet, u64::from(code), 2);
    packet.push(b'#');
    packet.extend_from_slice(state.as_bytes());
    packet.extend_from_slice(message.as_bytes());
    finish_packet(&mut packet, 0);
    packet
}

/// Build a syntactically well-formed handshake response with bogus
/// credentials.
///
/// Sent to a backend when the router refuses a blocked client but
/// still has a backend socket to dispose of: the backend records the
/// session as a bad-credential event instead of an aborted connect,
/// which keeps its error accounting honest.
pub fn build_fake_handshake_response() -> Vec<u8> {
    let mut packet = vec![0u8; HEADER_SIZE];
    codec::put_fixed_le(&mut packet, u64::from(FAKE_CLIENT_CAPABILITIES), 4);
    codec::put_fixed_le(&mut packet, u64::from(MAX_ALLOWED_PACKET), 4);
    packet.push(8); // charset: latin1_swedish_ci
    packet.extend_from_slice(&[0u8; 23]);
    codec::put_nul_str(&mut packet, FAKE_USERNAME);
    packet.push(20);
    packet.extend_from_slice(&[0x71; 20]);
    codec::put_nul_str(&mut packet, FAKE_SCHEMA);
    codec::put_nul_str(&mut packet, FAKE_AUTH_PLUGIN);
    finish_packet(&mut packet, 1);
    packet
}

/// Write the payload length and sequence id into a packet's header.
fn finish_packet(packet: &mut Vec<u8>, seq: u8) {
    let payload_len = packet.len() - HEADER_SIZE;
    debug_assert!(payload_len < 1 << 24);
    packet[0] = payload_len as u8;
    packet[1] = (payload_len >> 8) as u8;
    packet[2] = (payload_len >> 16) as u8;
    packet[3] = seq;
}
