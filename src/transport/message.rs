use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::utils::RelayError;

/// A chat message as exchanged by clients.
///
/// The relay never requires a frame to have this shape: payloads are
/// forwarded as opaque bytes, and this structure is only decoded to add
/// context to logs or to filter broker deliveries.
///
/// ```json
/// {"id":"1","content":"hi","sender":"a","receiver":"b","timestamp":"2024-01-01T00:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: String,
    pub receiver: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(bytes).map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, RelayError> {
        serde_json::to_vec(self).map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }
}

/// Payload bytes of a data frame, `None` for control frames.
pub fn frame_payload(msg: &WsMessage) -> Option<Vec<u8>> {
    match msg {
        WsMessage::Text(text) => Some(text.as_bytes().to_vec()),
        WsMessage::Binary(data) => Some(data.to_vec()),
        _ => None,
    }
}

/// Wraps broker bytes as a frame: text when they are UTF-8, binary otherwise.
pub fn payload_frame(payload: Vec<u8>) -> WsMessage {
    match String::from_utf8(payload) {
        Ok(text) => WsMessage::text(text),
        Err(e) => WsMessage::binary(e.into_bytes()),
    }
}
