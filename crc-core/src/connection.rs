//! Connection table (component C2). One [`Connection`] per open peer
//! socket: an outbound write queue, inbound read residue, and the typed
//! peer-role slot that [`crate::handlers`] promotes on registration.
//!
//! The write queue mirrors the append/drain contract of
//! `neutronium::net::channel::Channel`'s `Buffer`, minus the encryption
//! and framing that channel layers on top — this relay forwards raw,
//! already-framed bytes, so a plain growable byte vector is enough.

use mio::net::TcpStream;
use std::io::{self, Read, Write};

/// The peer role a connection slot has been promoted to. `Unknown` until
/// the first registration frame carrying `last_hop_id == 0` arrives.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Unknown,
    Server(u64),
    Client(u64),
}

impl Role {
    pub fn host_id(&self) -> Option<u64> {
        match self {
            Role::Unknown => None,
            Role::Server(id) | Role::Client(id) => Some(*id),
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server(_))
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Role::Client(_))
    }
}

pub struct Connection {
    pub stream: TcpStream,
    pub role: Role,
    write_buffer: Vec<u8>,
    /// Bytes read from the socket that did not yet form a whole frame.
    pub read_residue: Vec<u8>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Connection {
            stream,
            role: Role::Unknown,
            write_buffer: Vec::new(),
            read_residue: Vec::new(),
        }
    }

    /// Queues `bytes` for transmission. Multiple calls concatenate in call
    /// order; this ordering is load-bearing for the registration handshake
    /// (§4.5.1/§4.5.2 of the spec), which enqueues several messages back to
    /// back and relies on the peer seeing them in that order.
    pub fn append(&mut self, bytes: &[u8]) {
        self.write_buffer.extend_from_slice(bytes);
    }

    pub fn is_draining(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    /// Sends as many queued bytes as the kernel will currently accept,
    /// discarding the sent prefix. Returns the number of bytes sent.
    pub fn drain(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        while !self.write_buffer.is_empty() {
            match self.stream.write(&self.write_buffer) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buffer.drain(..n);
                    total += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }

    /// Reads up to `chunk_size` bytes into the read residue. Returns the
    /// number of bytes read, or `Ok(0)` both for a clean peer close and for
    /// "no more data is ready right now" (the caller distinguishes the two
    /// using the readiness event that triggered the read).
    pub fn read_into_residue(&mut self, chunk_size: usize) -> io::Result<usize> {
        let start = self.read_residue.len();
        self.read_residue.resize(start + chunk_size, 0);
        match self.stream.read(&mut self.read_residue[start..]) {
            Ok(n) => {
                self.read_residue.truncate(start + n);
                Ok(n)
            }
            Err(err) => {
                self.read_residue.truncate(start);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, TcpStream};
    use std::net::SocketAddr;

    fn connected_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        // Accept may need a moment on a loopback socket under mio's
        // non-blocking model; a couple of retries are enough in tests.
        let mut attempts = 0;
        loop {
            match listener.accept() {
                Ok((stream, _)) => break (Connection::new(stream), client),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && attempts < 1000 => {
                    attempts += 1;
                    std::thread::yield_now();
                }
                Err(err) => panic!("accept failed: {:?}", err),
            }
        }
    }

    #[test]
    fn append_concatenates_in_call_order() {
        let (mut conn, _client) = connected_pair();
        conn.append(b"hello ");
        conn.append(b"world");
        assert!(conn.is_draining());
        // Drive the drain to completion, retrying on WouldBlock as a real
        // event loop would after the next writable readiness.
        let mut sent = 0;
        while conn.is_draining() {
            sent += conn.drain().unwrap();
        }
        assert_eq!(sent, b"hello world".len());
    }

    #[test]
    fn fresh_connection_starts_unknown() {
        let (conn, _client) = connected_pair();
        assert_eq!(conn.role, Role::Unknown);
        assert!(!conn.is_draining());
    }
}
