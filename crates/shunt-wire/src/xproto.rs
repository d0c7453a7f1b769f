//! X protocol handshake inspection and message builders.
//!
//! An X message is a 4-byte little-endian length (counting the type
//! byte), one type byte, and a protobuf payload. The router only
//! understands three message types: the two a client may legally open
//! a session with, and the server-side Error.

use prost::Message;

use crate::error::{WireError, WireResult};
use crate::{Direction, HandshakePhase};

/// Bytes before the protobuf payload: length prefix plus type byte.
pub const MESSAGE_HEADER_SIZE: usize = 5;

/// `Mysqlx.ClientMessages.Type` values the router cares about.
pub mod client_messages {
    pub const CON_CAPABILITIES_GET: u8 = 1;
    pub const SESS_AUTHENTICATE_START: u8 = 4;
}

/// `Mysqlx.ServerMessages.Type` values the router cares about.
pub mod server_messages {
    pub const ERROR: u8 = 1;
}

/// `Mysqlx.Error`, reduced to the fields the router fills in.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorMessage {
    #[prost(uint32, tag = "2")]
    pub code: u32,
    #[prost(string, tag = "3")]
    pub msg: String,
    #[prost(string, tag = "4")]
    pub sql_state: String,
}

/// `Mysqlx.Connection.CapabilitiesGet` is an empty message.
#[derive(Clone, PartialEq, Message)]
pub struct CapabilitiesGet {}

/// Per-connection handshake tracker for the X protocol.
///
/// Each direction keeps a cursor into its own receive buffer so the
/// tracker can re-enter on partial reads. A message that cannot fit
/// the handshake buffer aborts the connection; legitimate handshake
/// messages are small, oversized ones are hostile.
#[derive(Debug)]
pub struct XHandshake {
    client_buf: Vec<u8>,
    server_buf: Vec<u8>,
    max_buffered: usize,
    done: bool,
}

impl XHandshake {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            client_buf: Vec::new(),
            server_buf: Vec::new(),
            max_buffered,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed bytes observed on the wire in the given direction.
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
            let (msg_type, total) = {
                let buf = self.buffer_mut(dir);
                if buf.len() < 4 {
                    break;
                }
                let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                if length == 0 {
                    return Err(WireError::BadPacket(
                        "zero-length X protocol message".to_string(),
                    ));
                }
                let total = length + 4;
                if total > max {
                    return Err(WireError::Oversize { len: total, max });
                }
                if buf.len() < total {
                    break;
                }
                (buf[4], total)
            };
            self.buffer_mut(dir).drain(..total);

            match dir {
                Direction::FromClient => {
                    // The first client message decides everything: a
                    // legal session opener ends inspection, anything
                    // else is a violation.
                    if msg_type == client_messages::SESS_AUTHENTICATE_START
                        || msg_type == client_messages::CON_CAPABILITIES_GET
                    {
                        self.done = true;
                    } else {
                        return Err(WireError::UnexpectedClientMessage(msg_type));
                    }
                }
                Direction::FromServer => {
                    // A server error is forwarded and ends inspection,
                    // mirroring the classic-side policy. Notices and
                    // capability replies just pass through.
                    if msg_type == server_messages::ERROR {
                        self.done = true;
                    }
                }
            }
        }

        Ok(if self.done {
            HandshakePhase::Complete
        } else {
            HandshakePhase::InProgress
        })
    }

    fn buffer_mut(&mut self, dir: Direction) -> &mut Vec<u8> {
        match dir {
            Direction::FromClient => &mut self.client_buf,
            Direction::FromServer => &mut self.server_buf,
        }
    }
}

/// Serialize a `Mysqlx.Error` frame.
pub fn build_error(code: u16, sql_state: &str, msg: &str) -> Vec<u8> {
    let payload = ErrorMessage {
        code: u32::from(code),
        msg: msg.to_string(),
        sql_state: sql_state.to_string(),
    }
    .encode_to_vec();
    frame(server_messages::ERROR, &payload)
}

/// Serialize an empty `CapabilitiesGet` frame.
///
/// Sent by the router toward a backend it is about to abandon, so the
/// backend does not record the session as abnormally terminated.
pub fn build_capabilities_get() -> Vec<u8> {
    frame(client_messages::CON_CAPABILITIES_GET, &[])
}

fn frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32 + 1).to_le_bytes());
    out.push(msg_type);
    out.extend_from_slice(payload);
    out
}
