//! Bulk Record Source Module
//!
//! The boundary to the external tabular dataset. The core consumes it
//! strictly as "next record or end": once during the initial load after
//! `setup-dht`, and again on every member that runs a redistribution pass.

pub mod loader;
pub mod types;


pub use loader::{CsvSource, RecordSource};
pub use types::Record;
