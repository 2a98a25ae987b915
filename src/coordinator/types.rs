use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

pub const MAX_USERNAME_LEN: usize = 15;

/// A registered user's lifecycle role. Exactly one member holds `Leader`
/// whenever a ring exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Free,
    InDht,
    Leader,
}

/// One registered participant, as the coordinator sees it.
#[derive(Debug, Clone)]
pub struct Member {
    pub username: String,
    pub ip: IpAddr,
    pub accept_port: u16,
    pub query_port: u16,
    pub role: Role,
}

impl Member {
    pub fn accept_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.accept_port)
    }

    pub fn query_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.query_port)
    }
}

/// Named validation and lifecycle errors the registry reports synchronously.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("busy: {0} in progress")]
    Busy(&'static str),
    #[error("username `{0}` is already registered")]
    UsernameTaken(String),
    #[error("username `{0}` must be alphabetic and at most {MAX_USERNAME_LEN} characters")]
    InvalidUsername(String),
    #[error("port {0} is already reserved")]
    PortReserved(u16),
    #[error("unknown user `{0}`")]
    UnknownUser(String),
    #[error("user `{0}` is not Free")]
    NotFree(String),
    #[error("a DHT already exists")]
    DhtExists,
    #[error("no DHT exists")]
    NoDht,
    #[error("ring size {n} must be between 2 and {available}")]
    RingSize { n: usize, available: usize },
    #[error("`{0}` is not the DHT leader")]
    NotLeader(String),
    #[error("no DHT is being created")]
    NotCreating,
    #[error("user `{0}` is not a ring member")]
    NotInRing(String),
    #[error("`{reporting}` does not match the pending user `{pending}`")]
    PendingMismatch { reporting: String, pending: String },
    #[error("no join or leave is pending")]
    NothingPending,
    #[error("a leave report must name the new leader")]
    MissingNewLeader,
    #[error("no teardown or stabilization is in progress")]
    NotTearingDown,
}
