use serde::{Deserialize, Serialize};

/// Outcome marker carried by every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

/// The wire envelope shared by every message in the system.
///
/// Serializes to `{"result": "SUCCESS"|"FAILURE", "type": <tag>, "data": <payload>}`
/// as UTF-8 JSON text. The `type`/`data` pair comes from the flattened,
/// adjacently tagged message union, so every message type has exactly one
/// payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    pub result: Outcome,
    #[serde(flatten)]
    pub message: M,
}

impl<M> Envelope<M> {
    pub fn success(message: M) -> Self {
        Self {
            result: Outcome::Success,
            message,
        }
    }

    pub fn failure(message: M) -> Self {
        Self {
            result: Outcome::Failure,
            message,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == Outcome::Success
    }
}
