//! Coordinator Module
//!
//! The registry and DHT lifecycle state machine. This is the only component
//! that may start a structural change: it validates operator commands against
//! the registered users, hands out the topology for a new ring, and holds the
//! busy flags (`creating`, `stabilizing`, `tearing_down`) that serialize
//! reconfigurations to one at a time.

pub mod registry;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;

pub use registry::Registry;
pub use service::CoordinatorService;
pub use types::{Member, RegistryError, Role};
