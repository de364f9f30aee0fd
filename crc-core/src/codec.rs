//! Wire codec (component C1). Splits a byte stream into whole frames and
//! encodes each of the five message kinds back into bytes. Mirrors the
//! byte-oriented, `byteorder`-driven style of `neutronium::net::frame` and
//! `neutronium::net::channel`, generalised from that crate's single
//! `Category` discriminant to the five CRC message kinds.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub mod kind {
    pub const SERVER_REGISTRATION: u8 = 0x00;
    pub const STATUS_UPDATE: u8 = 0x01;
    pub const CLIENT_REGISTRATION: u8 = 0x80;
    pub const CLIENT_CHAT: u8 = 0x81;
    pub const CLIENT_QUIT: u8 = 0x82;
}

pub mod status {
    pub const WELCOME: u8 = 0x00;
    pub const UNKNOWN_ID: u8 = 0x01;
    pub const DUPLICATE_ID: u8 = 0x02;
}

/// A fully decoded frame. `raw_bytes` is always the exact slice consumed
/// from the input, so forwarding a message verbatim is just re-appending
/// `raw_bytes` to a peer's write buffer — no re-encoding required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ServerRegistration {
        source_id: u64,
        last_hop_id: u64,
        server_name: String,
        server_info: String,
        raw_bytes: Vec<u8>,
    },
    StatusUpdate {
        source_id: u64,
        destination_id: u64,
        status_code: u8,
        content: String,
        raw_bytes: Vec<u8>,
    },
    ClientRegistration {
        source_id: u64,
        last_hop_id: u64,
        client_name: String,
        client_info: String,
        raw_bytes: Vec<u8>,
    },
    ClientChat {
        source_id: u64,
        destination_id: u64,
        content: String,
        raw_bytes: Vec<u8>,
    },
    ClientQuit {
        source_id: u64,
        raw_bytes: Vec<u8>,
    },
}

impl Message {
    pub fn kind(&self) -> u8 {
        match self {
            Message::ServerRegistration { .. } => kind::SERVER_REGISTRATION,
            Message::StatusUpdate { .. } => kind::STATUS_UPDATE,
            Message::ClientRegistration { .. } => kind::CLIENT_REGISTRATION,
            Message::ClientChat { .. } => kind::CLIENT_CHAT,
            Message::ClientQuit { .. } => kind::CLIENT_QUIT,
        }
    }

    pub fn source_id(&self) -> u64 {
        match self {
            Message::ServerRegistration { source_id, .. }
            | Message::StatusUpdate { source_id, .. }
            | Message::ClientRegistration { source_id, .. }
            | Message::ClientChat { source_id, .. }
            | Message::ClientQuit { source_id, .. } => *source_id,
        }
    }

    pub fn raw_bytes(&self) -> &[u8] {
        match self {
            Message::ServerRegistration { raw_bytes, .. }
            | Message::StatusUpdate { raw_bytes, .. }
            | Message::ClientRegistration { raw_bytes, .. }
            | Message::ClientChat { raw_bytes, .. }
            | Message::ClientQuit { raw_bytes, .. } => raw_bytes,
        }
    }
}

/// Parses as many whole frames as `input` holds. Returns the decoded
/// messages plus whatever trailing bytes make up a partial frame — the
/// caller must keep those and prepend them to the next read.
///
/// A recognised kind byte with an invalid/truncated body beyond "just
/// needs more bytes" is a [`Error::MalformedFrame`] and is fatal to the
/// connection, per the spec's §7 `MalformedFrame` policy.
pub fn parse(input: &[u8]) -> Result<(Vec<Message>, Vec<u8>)> {
    let mut messages = Vec::new();
    let mut offset = 0usize;

    loop {
        match parse_one(&input[offset..]) {
            Some(Ok((message, consumed))) => {
                offset += consumed;
                messages.push(message);
            }
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }

    Ok((messages, input[offset..].to_vec()))
}

/// Attempts to parse a single frame from the front of `buf`. Returns
/// `None` when `buf` does not yet hold a complete frame (caller should
/// wait for more bytes), `Some(Err(_))` when the frame is structurally
/// invalid, or `Some(Ok((message, consumed)))` on success.
fn parse_one(buf: &[u8]) -> Option<Result<(Message, usize)>> {
    if buf.is_empty() {
        return None;
    }

    let frame_kind = buf[0];
    let mut cursor = Cursor::new(&buf[1..]);

    let header_len = match frame_kind {
        kind::SERVER_REGISTRATION | kind::CLIENT_REGISTRATION => 8 + 8 + 4,
        kind::STATUS_UPDATE => 8 + 8 + 1 + 4,
        kind::CLIENT_CHAT => 8 + 8 + 4,
        kind::CLIENT_QUIT => 8 + 4,
        _ => return Some(Err(Error::MalformedFrame("unrecognized message kind"))),
    };

    if buf.len() < 1 + header_len {
        return None;
    }

    let source_id = cursor.read_u64::<BigEndian>().ok()?;

    let result = match frame_kind {
        kind::SERVER_REGISTRATION | kind::CLIENT_REGISTRATION => {
            let last_hop_id = cursor.read_u64::<BigEndian>().ok()?;
            let payload_len = cursor.read_u32::<BigEndian>().ok()? as usize;
            let payload_start = 1 + header_len;
            if buf.len() < payload_start + payload_len {
                return None;
            }
            let payload = &buf[payload_start..payload_start + payload_len];
            let (name, info) = match read_two_strings(payload) {
                Some(pair) => pair,
                None => return Some(Err(Error::MalformedFrame("bad name/info payload"))),
            };
            let total = payload_start + payload_len;
            let raw_bytes = buf[..total].to_vec();
            let message = if frame_kind == kind::SERVER_REGISTRATION {
                Message::ServerRegistration {
                    source_id,
                    last_hop_id,
                    server_name: name,
                    server_info: info,
                    raw_bytes,
                }
            } else {
                Message::ClientRegistration {
                    source_id,
                    last_hop_id,
                    client_name: name,
                    client_info: info,
                    raw_bytes,
                }
            };
            Ok((message, total))
        }
        kind::STATUS_UPDATE => {
            let destination_id = cursor.read_u64::<BigEndian>().ok()?;
            let status_code = cursor.read_u8().ok()?;
            let payload_len = cursor.read_u32::<BigEndian>().ok()? as usize;
            let payload_start = 1 + header_len;
            if buf.len() < payload_start + payload_len {
                return None;
            }
            let content = match String::from_utf8(buf[payload_start..payload_start + payload_len].to_vec()) {
                Ok(s) => s,
                Err(_) => return Some(Err(Error::MalformedFrame("status content is not utf-8"))),
            };
            let total = payload_start + payload_len;
            Ok((
                Message::StatusUpdate {
                    source_id,
                    destination_id,
                    status_code,
                    content,
                    raw_bytes: buf[..total].to_vec(),
                },
                total,
            ))
        }
        kind::CLIENT_CHAT => {
            let destination_id = cursor.read_u64::<BigEndian>().ok()?;
            let payload_len = cursor.read_u32::<BigEndian>().ok()? as usize;
            let payload_start = 1 + header_len;
            if buf.len() < payload_start + payload_len {
                return None;
            }
            let content = match String::from_utf8(buf[payload_start..payload_start + payload_len].to_vec()) {
                Ok(s) => s,
                Err(_) => return Some(Err(Error::MalformedFrame("chat content is not utf-8"))),
            };
            let total = payload_start + payload_len;
            Ok((
                Message::ClientChat {
                    source_id,
                    destination_id,
                    content,
                    raw_bytes: buf[..total].to_vec(),
                },
                total,
            ))
        }
        kind::CLIENT_QUIT => {
            let payload_len = cursor.read_u32::<BigEndian>().ok()? as usize;
            if payload_len != 0 {
                return Some(Err(Error::MalformedFrame("client quit must carry no payload")));
            }
            let total = 1 + header_len;
            Ok((
                Message::ClientQuit {
                    source_id,
                    raw_bytes: buf[..total].to_vec(),
                },
                total,
            ))
        }
        _ => unreachable!("kind already validated above"),
    };

    Some(result)
}

fn read_two_strings(payload: &[u8]) -> Option<(String, String)> {
    let mut cursor = Cursor::new(payload);
    let name_len = cursor.read_u16::<BigEndian>().ok()? as usize;
    let mut name = vec![0u8; name_len];
    std::io::Read::read_exact(&mut cursor, &mut name).ok()?;
    let info_len = cursor.read_u16::<BigEndian>().ok()? as usize;
    let mut info = vec![0u8; info_len];
    std::io::Read::read_exact(&mut cursor, &mut info).ok()?;
    Some((String::from_utf8(name).ok()?, String::from_utf8(info).ok()?))
}

fn write_two_strings(out: &mut Vec<u8>, a: &str, b: &str) {
    out.write_u16::<BigEndian>(a.len() as u16).unwrap();
    out.extend_from_slice(a.as_bytes());
    out.write_u16::<BigEndian>(b.len() as u16).unwrap();
    out.extend_from_slice(b.as_bytes());
}

pub fn encode_server_registration(source_id: u64, last_hop_id: u64, name: &str, info: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    write_two_strings(&mut payload, name, info);

    let mut out = Vec::with_capacity(1 + 20 + payload.len());
    out.push(kind::SERVER_REGISTRATION);
    out.write_u64::<BigEndian>(source_id).unwrap();
    out.write_u64::<BigEndian>(last_hop_id).unwrap();
    out.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(&payload);
    out
}

pub fn encode_client_registration(source_id: u64, last_hop_id: u64, name: &str, info: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    write_two_strings(&mut payload, name, info);

    let mut out = Vec::with_capacity(1 + 20 + payload.len());
    out.push(kind::CLIENT_REGISTRATION);
    out.write_u64::<BigEndian>(source_id).unwrap();
    out.write_u64::<BigEndian>(last_hop_id).unwrap();
    out.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(&payload);
    out
}

pub fn encode_status_update(source_id: u64, destination_id: u64, status_code: u8, content: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 21 + content.len());
    out.push(kind::STATUS_UPDATE);
    out.write_u64::<BigEndian>(source_id).unwrap();
    out.write_u64::<BigEndian>(destination_id).unwrap();
    out.write_u8(status_code).unwrap();
    out.write_u32::<BigEndian>(content.len() as u32).unwrap();
    out.extend_from_slice(content.as_bytes());
    out
}

pub fn encode_client_chat(source_id: u64, destination_id: u64, content: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 20 + content.len());
    out.push(kind::CLIENT_CHAT);
    out.write_u64::<BigEndian>(source_id).unwrap();
    out.write_u64::<BigEndian>(destination_id).unwrap();
    out.write_u32::<BigEndian>(content.len() as u32).unwrap();
    out.extend_from_slice(content.as_bytes());
    out
}

pub fn encode_client_quit(source_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 12);
    out.push(kind::CLIENT_QUIT);
    out.write_u64::<BigEndian>(source_id).unwrap();
    out.write_u32::<BigEndian>(0).unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_server_registration() {
        let bytes = encode_server_registration(2, 0, "s2", "second server");
        let (messages, leftover) = parse(&bytes).unwrap();
        assert!(leftover.is_empty());
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::ServerRegistration {
                source_id,
                last_hop_id,
                server_name,
                server_info,
                raw_bytes,
            } => {
                assert_eq!(*source_id, 2);
                assert_eq!(*last_hop_id, 0);
                assert_eq!(server_name, "s2");
                assert_eq!(server_info, "second server");
                assert_eq!(raw_bytes, &bytes);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn splits_concatenated_frames_and_keeps_partial_tail() {
        let mut stream = encode_client_chat(100, 200, "hi");
        stream.extend(encode_client_quit(100));
        stream.extend_from_slice(&[0x81, 0x00]); // partial chat frame

        let (messages, leftover) = parse(&stream).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(leftover, vec![0x81, 0x00]);
    }

    #[test]
    fn feeding_leftover_later_completes_the_frame() {
        let full = encode_client_chat(1, 2, "hello there");
        let (first_messages, leftover) = parse(&full[..10]).unwrap();
        assert!(first_messages.is_empty());

        let mut resumed = leftover;
        resumed.extend_from_slice(&full[10..]);
        let (messages, leftover2) = parse(&resumed).unwrap();
        assert!(leftover2.is_empty());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].raw_bytes(), &full[..]);
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let bytes = vec![0xFF, 0, 0, 0, 0, 0, 0, 0, 1];
        assert!(parse(&bytes).is_err());
    }

    #[test]
    fn client_quit_round_trips() {
        let bytes = encode_client_quit(42);
        let (messages, leftover) = parse(&bytes).unwrap();
        assert!(leftover.is_empty());
        match &messages[0] {
            Message::ClientQuit { source_id, .. } => assert_eq!(*source_id, 42),
            other => panic!("unexpected message {:?}", other),
        }
    }
}
