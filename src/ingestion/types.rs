use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An externally supplied keyed payload.
///
/// The key is the single field used for placement; the remaining columns are
/// opaque and carried unchanged wherever the record travels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }
}
