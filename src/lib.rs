//! Reconfigurable Ring DHT Library
//!
//! This library crate defines the core modules of the distributed hash table.
//! It serves as the foundation for the two binary executables
//! (`bin/coordinator.rs` and `bin/node.rs`).
//!
//! ## Architecture Modules
//! The system is composed of five loosely coupled subsystems:
//!
//! - **`coordinator`**: The registry and lifecycle state machine. The single
//!   source of truth for which users exist, their roles, and which structural
//!   change (setup, join, leave, teardown) is currently in flight.
//! - **`node`**: The ring member. Runs the accept/query listener loops and the
//!   reconfiguration state machine that mutates topology and redistributes
//!   stored records.
//! - **`routing`**: The deterministic key -> bucket -> owner placement logic
//!   and the per-member shard of hash buckets.
//! - **`protocol`**: The wire envelope, the tagged control/query message
//!   unions, and the coordinator command grammar.
//! - **`ingestion`**: The bulk record source boundary. Reads a tabular dataset
//!   one record at a time for the initial load and every redistribution pass.

pub mod coordinator;
pub mod ingestion;
pub mod node;
pub mod protocol;
pub mod routing;
pub mod transport;
