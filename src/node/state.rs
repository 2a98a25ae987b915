use crate::coordinator::types::Role;
use crate::protocol::{PeerAddr, TopologyDescriptor, TopologySlice};
use crate::routing::{self, Placement, Shard};
use std::net::SocketAddr;

/// One ring member's mutable view of the world.
///
/// Mutated from both listener loops, so it always lives behind a single
/// mutex; the methods here only change fields and never touch the network.
#[derive(Debug)]
pub struct NodeState {
    pub username: String,
    pub role: Role,
    pub ring_id: Option<usize>,
    pub ring_size: Option<usize>,
    pub successor: Option<PeerAddr>,
    pub predecessor: Option<SocketAddr>,
    pub shard: Shard,
    /// Set while this member drives a leave; flips the branches of the
    /// circulating reconfiguration messages.
    pub leaving: bool,
    /// Set while this member drives a join.
    pub joining: bool,
    /// Looped-query guard: set when a query is forwarded, tripped when one
    /// comes around again unresolved.
    pub forwarded_query: bool,
    /// Learned from the reset-right reply during a leave; reported to the
    /// coordinator with `dht-rebuilt`.
    pub new_leader: Option<String>,
    /// Set by the member that starts a check-nodes circulation so it can stop
    /// the message after one revolution.
    pub check_origin: bool,
    /// The key a locally driven query is waiting on.
    pub pending_query: Option<String>,
}

impl NodeState {
    pub fn new(username: String) -> Self {
        Self {
            username,
            role: Role::Free,
            ring_id: None,
            ring_size: None,
            successor: None,
            predecessor: None,
            shard: Shard::new(),
            leaving: false,
            joining: false,
            forwarded_query: false,
            new_leader: None,
            check_origin: false,
            pending_query: None,
        }
    }

    /// Adopt a `set-id` assignment: predecessor, own position, successor.
    pub fn install_slice(&mut self, slice: &TopologySlice) {
        self.predecessor = Some(slice.prev.accept_addr());
        self.ring_id = Some(slice.me.ring_id);
        self.ring_size = Some(slice.me.n);
        self.successor = Some(slice.next.peer_addr());
        self.role = if slice.me.ring_id == 0 {
            Role::Leader
        } else {
            Role::InDht
        };
    }

    /// The leader's own view of a freshly granted topology: it sits at
    /// position 0, between the last member and the first non-leader.
    pub fn install_ring(&mut self, descriptors: &[TopologyDescriptor]) {
        let count = descriptors.len();
        self.install_slice(&TopologySlice {
            prev: descriptors[count - 1].clone(),
            me: descriptors[0].clone(),
            next: descriptors[1 % count].clone(),
        });
    }

    pub fn place(&self, key: &str) -> Option<Placement> {
        match (self.ring_id, self.ring_size) {
            (Some(ring_id), Some(ring_size)) => Some(routing::place(key, ring_size, ring_id)),
            _ => None,
        }
    }

    /// Renumber during a leave: take the circulated id and shrink the ring.
    pub fn renumber(&mut self, new_id: usize) {
        self.ring_id = Some(new_id);
        self.ring_size = self.ring_size.map(|n| n - 1);
        self.role = if new_id == 0 { Role::Leader } else { Role::InDht };
    }

    /// Grow the ring size during a join circulation; returns the new size.
    pub fn grow_ring(&mut self) -> Option<usize> {
        self.ring_size = self.ring_size.map(|n| n + 1);
        self.ring_size
    }

    /// The joining member adopts its final position: last in the ring.
    pub fn adopt_join_position(&mut self, prev: SocketAddr, ring_size: usize) {
        self.predecessor = Some(prev);
        self.ring_size = Some(ring_size);
        self.ring_id = Some(ring_size - 1);
        self.role = Role::InDht;
    }

    pub fn splice_successor(&mut self, accept: SocketAddr, query: SocketAddr) {
        self.successor = Some(PeerAddr { accept, query });
    }

    pub fn clear_shard(&mut self) {
        self.shard.clear();
    }

    /// Full reset back to `Free`: shard, position, and neighbors all go.
    pub fn clear_all(&mut self) {
        self.shard.clear();
        self.role = Role::Free;
        self.ring_id = None;
        self.ring_size = None;
        self.successor = None;
        self.predecessor = None;
        self.leaving = false;
        self.joining = false;
        self.forwarded_query = false;
        self.new_leader = None;
    }

    pub fn is_leader(&self) -> bool {
        self.ring_id == Some(0)
    }

    /// Human-readable topology dump for the check-node diagnostics.
    pub fn summary(&self) -> String {
        format!(
            "node {}: role={:?} id={:?} n={:?} prev={:?} next={:?} records={}",
            self.username,
            self.role,
            self.ring_id,
            self.ring_size,
            self.predecessor,
            self.successor.map(|peer| peer.accept),
            self.shard.record_count()
        )
    }
}
