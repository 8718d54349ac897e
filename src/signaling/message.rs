use serde::{Deserialize, Serialize};

use crate::transport::SessionDescription;

pub const EVENT_OFFER: &str = "offer";
pub const EVENT_ANSWER: &str = "answer";
pub const EVENT_ERROR: &str = "error";

/// Wire unit exchanged with the viewer page. `data` is itself serialized
/// JSON (a session description) or plain text for `error`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub event: String,
    #[serde(default)]
    pub data: String,
}

impl SignalingMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    pub fn offer(description: &SessionDescription) -> serde_json::Result<Self> {
        Ok(Self::new(EVENT_OFFER, serde_json::to_string(description)?))
    }

    #[cfg(test)]
    pub fn answer(description: &SessionDescription) -> serde_json::Result<Self> {
        Ok(Self::new(EVENT_ANSWER, serde_json::to_string(description)?))
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(EVENT_ERROR, reason)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse `data` as a session description.
    pub fn description(&self) -> serde_json::Result<SessionDescription> {
        serde_json::from_str(&self.data)
    }
}
