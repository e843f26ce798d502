//! Relay payload format shared by the bridge and the personality server.
//!
//! A payload is either a JSON object `{"id": "...", "text": "..."}` or plain UTF-8 text.
//! Plain text carries no correlation id; it is what older peers publish.

use serde::{Deserialize, Serialize};

/// Body of a relayed request or response, with an optional correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
}

impl RelayPayload {
    pub fn new(id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }

    /// Encode as JSON when an id is present, otherwise as plain text.
    pub fn encode(&self) -> Vec<u8> {
        if self.id.is_some() {
            if let Ok(json) = serde_json::to_vec(self) {
                return json;
            }
        }
        self.text.clone().into_bytes()
    }

    /// Decode a payload. Anything that is not a JSON object with a string `text` is plain text.
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<RelayPayload>(bytes) {
            Ok(payload) => payload,
            Err(_) => Self {
                id: None,
                text: String::from_utf8_lossy(bytes).into_owned(),
            },
        }
    }
}
