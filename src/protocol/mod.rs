//! Wire Protocol Module
//!
//! Defines the datagram envelope shared by every message in the system and
//! the typed payloads that travel inside it.
//!
//! ## Core Pieces
//! - **Envelope**: the `{result, type, data}` JSON object carried in every
//!   UDP datagram, in both directions.
//! - **Messages**: adjacently tagged unions for member control traffic,
//!   query traffic, and coordinator replies. One payload shape per type.
//! - **Command**: the space-separated text grammar clients and members use
//!   to talk to the coordinator.

pub mod command;
pub mod envelope;
pub mod messages;

#[cfg(test)]
mod tests;

pub use command::Command;
pub use envelope::{Envelope, Outcome};
pub use messages::{
    ControlMessage, JoinState, LeaderAddrs, PeerAddr, QueryMessage, QueryRequest, Relink, Reply,
    TopologyDescriptor, TopologySlice,
};
