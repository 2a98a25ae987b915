//! Typed message payloads.
//!
//! Three unions travel inside the envelope, one per channel:
//! - [`ControlMessage`]: member accept port (topology and record traffic).
//! - [`QueryMessage`]: member query port.
//! - [`Reply`]: coordinator responses to text commands.

use crate::ingestion::Record;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// One member's place in the ring, as handed out by the coordinator at
/// construction time and relayed during reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescriptor {
    pub n: usize,
    pub ring_id: usize,
    pub username: String,
    pub ip: IpAddr,
    pub accept_port: u16,
    pub query_port: u16,
}

impl TopologyDescriptor {
    pub fn accept_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.accept_port)
    }

    pub fn query_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.query_port)
    }

    pub fn peer_addr(&self) -> PeerAddr {
        PeerAddr {
            accept: self.accept_addr(),
            query: self.query_addr(),
        }
    }
}

/// A neighbor's pair of listening addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub accept: SocketAddr,
    pub query: SocketAddr,
}

/// The `set-id` payload: a member's predecessor, own, and successor
/// descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySlice {
    pub prev: TopologyDescriptor,
    pub me: TopologyDescriptor,
    pub next: TopologyDescriptor,
}

/// State circulated by `reset-n` while a member joins.
///
/// The joining member seeds it with `n = 0` and its own addresses; the leader
/// fills in the grown ring size, the insertion point fills in `prev`, and the
/// joiner reads its final position out of it when the message returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinState {
    pub username: String,
    pub n: usize,
    pub addr: SocketAddr,
    pub query: SocketAddr,
    #[serde(default)]
    pub prev: Option<SocketAddr>,
}

/// The `reset-left` payload: rewire whoever points at `current` to point at
/// `new` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relink {
    pub current: SocketAddr,
    pub new: SocketAddr,
    pub query: SocketAddr,
}

/// Control traffic on a member's accept port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ControlMessage {
    SetId(TopologySlice),
    Record(Record),
    LeavingTeardown,
    ResetId(usize),
    ResetN(JoinState),
    ResetLeft(Relink),
    ResetRight(SocketAddr),
    ResetComplete,
    RebuildDht(SocketAddr),
    DhtRebuilt,
    Teardown,
    CheckNodes,
    /// Synchronous acknowledgment for the request/response steps (`set-id`
    /// fan-out, `reset-right` identity report).
    Ack(Option<String>),
}

/// A point query and where to deliver its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub key: String,
    pub origin: SocketAddr,
}

/// Traffic on a member's query port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum QueryMessage {
    Query(QueryRequest),
    QueryResult(Option<Record>),
}

/// The leader's pair of addresses, granted to a joining member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderAddrs {
    pub accept: SocketAddr,
    pub query: SocketAddr,
}

/// Coordinator responses to text commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Reply {
    Registered(String),
    Deregistered(String),
    /// `setup-dht` grant: the full ordered topology descriptor set, leader
    /// first.
    Topology(Vec<TopologyDescriptor>),
    SetupComplete,
    /// `query-dht` grant: a uniformly-random ring member to use as the query
    /// entry point.
    QueryNode(TopologyDescriptor),
    JoinGrant(LeaderAddrs),
    LeaveGrant,
    RebuiltAck,
    TeardownGrant,
    TeardownDone,
    Listing(Vec<String>),
    Error(String),
}
