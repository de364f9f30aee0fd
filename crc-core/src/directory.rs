//! Host directory & router (component C3). Keeps a flat map from host id to
//! host record plus the two adjacency sets that cache "which of those
//! records are directly connected to this node" — mirroring the
//! `channels`/`live: IndexSet<ChannelId>` split in
//! `neutronium::net::endpoint::Endpoint`, generalised from "one pool of
//! connections" to "one pool of hosts, some adjacent, most not".

use hashbrown::HashMap;
use indexmap::IndexSet;

/// A server or client known to this node, adjacent or reached through a
/// neighbour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRecord {
    Server {
        id: u64,
        name: String,
        info: String,
        first_link_id: u64,
    },
    Client {
        id: u64,
        name: String,
        info: String,
        first_link_id: u64,
    },
}

impl HostRecord {
    pub fn id(&self) -> u64 {
        match self {
            HostRecord::Server { id, .. } | HostRecord::Client { id, .. } => *id,
        }
    }

    pub fn first_link_id(&self) -> u64 {
        match self {
            HostRecord::Server { first_link_id, .. } | HostRecord::Client { first_link_id, .. } => {
                *first_link_id
            }
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, HostRecord::Server { .. })
    }

    pub fn is_client(&self) -> bool {
        matches!(self, HostRecord::Client { .. })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DuplicateId {
    Duplicate(u64),
}

/// The directory owned by a single relay node, keyed by this node's own id
/// so `next_hop_id` can tell "adjacent" apart from "routed".
pub struct Directory {
    self_id: u64,
    hosts: HashMap<u64, HostRecord>,
    adjacent_servers: IndexSet<u64>,
    adjacent_clients: IndexSet<u64>,
}

impl Directory {
    pub fn new(self_id: u64) -> Directory {
        Directory {
            self_id,
            hosts: HashMap::new(),
            adjacent_servers: IndexSet::new(),
            adjacent_clients: IndexSet::new(),
        }
    }

    pub fn self_id(&self) -> u64 {
        self.self_id
    }

    pub fn lookup(&self, id: u64) -> Option<&HostRecord> {
        self.hosts.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.hosts.contains_key(&id) || id == self.self_id
    }

    /// Inserts a new record. Fails with `DuplicateId` if a record for that
    /// id already exists, or if `id` equals this node's own id — callers
    /// (the registration handlers) must turn this into the spec's
    /// duplicate-id status update.
    pub fn insert(&mut self, record: HostRecord) -> Result<(), DuplicateId> {
        let id = record.id();
        if self.contains(id) {
            return Err(DuplicateId::Duplicate(id));
        }
        self.hosts.insert(id, record);
        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Option<HostRecord> {
        let removed = self.hosts.remove(&id);
        self.adjacent_clients.shift_remove(&id);
        self.adjacent_servers.shift_remove(&id);
        removed
    }

    pub fn mark_adjacent_server(&mut self, id: u64) {
        self.adjacent_servers.insert(id);
    }

    pub fn mark_adjacent_client(&mut self, id: u64) {
        self.adjacent_clients.insert(id);
    }

    pub fn adjacent_servers(&self) -> &IndexSet<u64> {
        &self.adjacent_servers
    }

    pub fn adjacent_clients(&self) -> &IndexSet<u64> {
        &self.adjacent_clients
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.values()
    }

    /// Returns the id of the next hop on the path toward `destination_id`:
    /// the destination itself when adjacent, otherwise the neighbour to
    /// forward through. `None` when the destination is unknown.
    pub fn next_hop_id(&self, destination_id: u64) -> Option<u64> {
        let record = self.hosts.get(&destination_id)?;
        if record.first_link_id() == self.self_id {
            Some(destination_id)
        } else {
            Some(record.first_link_id())
        }
    }

    /// Checks the invariants listed in the spec's §8. Intended for test
    /// assertions, not for the hot path.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        for &id in self.adjacent_servers.iter().chain(self.adjacent_clients.iter()) {
            let record = self.hosts.get(&id).unwrap_or_else(|| {
                panic!("adjacency set references missing host {}", id)
            });
            assert_eq!(record.first_link_id(), self.self_id);
        }
        assert!(
            self.adjacent_servers.is_disjoint(&self.adjacent_clients),
            "adjacency sets must be disjoint"
        );
        assert!(!self.adjacent_servers.contains(&self.self_id));
        assert!(!self.adjacent_clients.contains(&self.self_id));
        assert!(!self.hosts.contains_key(&self.self_id));
    }
}
