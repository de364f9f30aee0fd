use std::fmt;
use std::io;

/// Unified error type for every fallible operation in the relay node, from
/// wire decoding up through config loading. Mirrors the taxonomy a caller
/// needs to distinguish: some variants are recoverable per-connection
/// events, others are fatal to the whole node.
#[derive(Debug)]
pub enum Error {
    /// A registration named an id already present in the directory.
    DuplicateId(u64),
    /// A chat or status frame named a destination id this node has never
    /// heard of.
    UnknownDestination(u64),
    /// The wire codec could not decode a frame; the connection that
    /// produced it is treated the same as a closed peer.
    MalformedFrame(&'static str),
    /// `next_hop_id` resolved to an id with no matching open connection.
    /// Indicates a directory/connection-table invariant violation.
    DirectoryInconsistency(u64),
    /// Configuration file failed to parse or load.
    Config(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateId(id) => write!(f, "a machine has already registered with ID {}", id),
            Error::UnknownDestination(id) => write!(f, "unknown ID {}", id),
            Error::MalformedFrame(reason) => write!(f, "malformed frame: {}", reason),
            Error::DirectoryInconsistency(id) => {
                write!(f, "no open connection for routed host {}", id)
            }
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
