//! I/O loop (component C4). A single-threaded, `mio`-driven readiness loop
//! that accepts connections, reads and dispatches frames, and drains
//! outbound write buffers — generalised from
//! `neutronium::net::endpoint::Endpoint::sync`'s three-poll-passes-per-tick
//! shape down to the single listener + single pool of peer connections
//! this simpler protocol needs (no separate handshake state: registration
//! here is just the first frame on a connection, not a multi-step
//! cryptographic handshake).

use crate::codec;
use crate::config::{BootstrapConfig, NodeConfig};
use crate::connection::Connection;
use crate::directory::Directory;
use crate::error::Result;
use hashbrown::HashMap;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slog::Logger;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

/// A single relay node: listening socket, open peer connections, the host
/// directory, and the status-updates log the spec keeps purely for
/// observation.
pub struct Node {
    pub(crate) self_id: u64,
    pub(crate) name: String,
    pub(crate) info: String,
    pub(crate) directory: Directory,
    pub(crate) connections: HashMap<Token, Connection>,
    pub(crate) log: Logger,
    pub status_updates_log: Vec<String>,

    listener: TcpListener,
    poll: Poll,
    events: Events,
    next_token: usize,
    shutdown: Arc<AtomicBool>,
}

impl Node {
    /// Binds the listening socket for a node described by `config`. Does
    /// not yet connect to a bootstrap peer — call [`Node::connect_bootstrap`]
    /// afterward if `config.bootstrap` is set.
    pub fn bind(config: &NodeConfig, log: Logger) -> Result<Node> {
        let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse().expect("valid bind address");
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        slog::info!(log, "listening"; "port" => config.port, "id" => config.id);

        Ok(Node {
            self_id: config.id,
            name: config.server_name.clone(),
            info: config.server_info.clone(),
            directory: Directory::new(config.id),
            connections: HashMap::new(),
            log,
            status_updates_log: Vec::new(),
            listener,
            poll,
            events: Events::with_capacity(1024),
            next_token: 1,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A handle the caller can flip from another thread (or a signal
    /// handler) to request a clean shutdown at the top of the next tick.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// The address the listening socket is bound to. Mostly useful in
    /// tests that bind to an ephemeral port and then need it for a peer's
    /// bootstrap config.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Opens the one outbound connection a non-seed server makes on
    /// startup, and enqueues the initial `ServerRegistration` with
    /// `last_hop_id = 0` (§4.4 step 2).
    pub fn connect_bootstrap(&mut self, bootstrap: &BootstrapConfig) -> Result<()> {
        let addr = SocketAddr::new(IpAddr::V4(bootstrap.connect_to_host_addr), bootstrap.connect_to_port);
        let mut stream = TcpStream::connect(addr)?;
        let token = self.allocate_token();
        self.poll
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;

        let mut conn = Connection::new(stream);
        conn.append(&codec::encode_server_registration(
            self.self_id,
            0,
            &self.name,
            &self.info,
        ));

        slog::info!(self.log, "connecting to bootstrap server";
            "host" => &bootstrap.connect_to_host, "port" => bootstrap.connect_to_port);

        self.connections.insert(token, conn);
        Ok(())
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Runs the readiness loop until the shutdown handle is set, then
    /// closes every registered socket.
    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.tick()?;
        }
        self.close_all();
        Ok(())
    }

    /// Drives exactly one readiness pass: wait (bounded by
    /// `POLL_TIMEOUT`), accept, read+dispatch, then drain writes. Exposed
    /// separately from [`Node::run`] so tests can observe the directory
    /// after a deterministic number of ticks (§8 scenario 1).
    pub fn tick(&mut self) -> Result<()> {
        self.poll.poll(&mut self.events, Some(POLL_TIMEOUT))?;

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| (event.token(), event.is_readable(), event.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            if token == LISTENER_TOKEN {
                if readable {
                    self.accept_new_connections();
                }
                continue;
            }

            if readable {
                self.on_readable(token);
            }
            // The read above may have closed the connection (peer close,
            // reset, or malformed frame); re-check before draining.
            if writable && self.connections.contains_key(&token) {
                self.on_writable(token);
            }
        }

        Ok(())
    }

    fn accept_new_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = self.allocate_token();
                    if let Err(err) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                    {
                        slog::warn!(self.log, "failed to register accepted connection"; "error" => %err);
                        continue;
                    }
                    slog::debug!(self.log, "accepted connection"; "addr" => %addr, "token" => token.0);
                    self.connections.insert(token, Connection::new(stream));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    slog::warn!(self.log, "accept failed"; "error" => %err);
                    break;
                }
            }
        }
    }

    fn on_readable(&mut self, token: Token) {
        loop {
            let read = match self.connections.get_mut(&token) {
                Some(conn) => conn.read_into_residue(READ_CHUNK),
                None => return,
            };

            match read {
                Ok(0) => {
                    slog::debug!(self.log, "peer closed connection"; "token" => token.0);
                    self.close_connection(token);
                    return;
                }
                Ok(_) => {
                    if !self.drain_and_dispatch(token) {
                        return;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    slog::debug!(self.log, "connection reset"; "token" => token.0, "error" => %err);
                    self.close_connection(token);
                    return;
                }
            }
        }
    }

    /// Parses every whole frame currently buffered for `token` and
    /// dispatches each to its handler. Returns `false` if a malformed
    /// frame closed the connection (the caller must stop reading from it).
    fn drain_and_dispatch(&mut self, token: Token) -> bool {
        let residue = match self.connections.get(&token) {
            Some(conn) => conn.read_residue.clone(),
            None => return false,
        };

        let (messages, leftover) = match codec::parse(&residue) {
            Ok(parsed) => parsed,
            Err(err) => {
                slog::debug!(self.log, "malformed frame, closing connection";
                    "token" => token.0, "error" => %err);
                self.close_connection(token);
                return false;
            }
        };

        if let Some(conn) = self.connections.get_mut(&token) {
            conn.read_residue = leftover;
        }

        for message in messages {
            self.dispatch(token, message);
            if !self.connections.contains_key(&token) {
                // The handler itself can close this connection (it never
                // does today, but a future handler might); stop early.
                return false;
            }
        }

        true
    }

    fn on_writable(&mut self, token: Token) {
        let result = match self.connections.get_mut(&token) {
            Some(conn) if conn.is_draining() => conn.drain(),
            _ => return,
        };

        if let Err(err) = result {
            slog::debug!(self.log, "write error, closing connection"; "token" => token.0, "error" => %err);
            self.close_connection(token);
        }
    }

    /// Deregisters and closes a connection's socket. Per the spec, this
    /// does not remove the corresponding directory entry — server record
    /// removal on disconnect is an explicit non-goal; only an explicit
    /// `ClientQuit` frame removes a client record.
    pub(crate) fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close_connection(token);
        }
        let _ = self.poll.registry().deregister(&mut self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootstrapConfig;
    use crate::logging;

    fn test_config(id: u64, name: &str) -> NodeConfig {
        NodeConfig {
            id,
            server_name: name.to_string(),
            server_info: String::new(),
            port: 0,
            bootstrap: None,
            log_file: None,
        }
    }

    fn settle(nodes: &mut [&mut Node], ticks: usize) {
        for _ in 0..ticks {
            for node in nodes.iter_mut() {
                node.tick().unwrap();
            }
        }
    }

    #[test]
    fn seed_boot_has_empty_directory_after_one_tick() {
        let log = logging::init(None);
        let mut node = Node::bind(&test_config(1, "s1"), log).unwrap();
        node.tick().unwrap();

        assert_eq!(node.directory().adjacent_servers().len(), 0);
        assert_eq!(node.directory().adjacent_clients().len(), 0);
        assert!(node.status_updates_log.is_empty());
    }

    #[test]
    fn two_server_join_settles_adjacency_both_ways() {
        let log1 = logging::init(None);
        let log2 = logging::init(None);
        let mut s1 = Node::bind(&test_config(1, "s1"), log1).unwrap();
        let mut s2 = Node::bind(&test_config(2, "s2"), log2).unwrap();

        let s1_addr = s1.local_addr().unwrap();
        s2.connect_bootstrap(&BootstrapConfig {
            connect_to_host: "s1".to_string(),
            connect_to_host_addr: match s1_addr.ip() {
                std::net::IpAddr::V4(v4) => v4,
                _ => unreachable!(),
            },
            connect_to_port: s1_addr.port(),
        })
        .unwrap();

        settle(&mut [&mut s1, &mut s2], 20);

        assert!(s1.directory().adjacent_servers().contains(&2));
        assert_eq!(s1.directory().lookup(2).unwrap().first_link_id(), 1);

        assert!(s2.directory().adjacent_servers().contains(&1));
        assert_eq!(s2.directory().lookup(1).unwrap().first_link_id(), 2);
    }
}
