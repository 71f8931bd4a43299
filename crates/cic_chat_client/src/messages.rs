//! WebSocket message types for the chat protocol. Client ↔ server JSON.

use serde::{Deserialize, Serialize};

/// Route key the server dispatches the initial request on.
pub const SEND_MESSAGE_ACTION: &str = "sendMessage";

/// Client → server: the single request sent when the socket opens.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub action: &'static str,
    pub prompt: &'a str,
    pub language: &'a str,
}

impl<'a> ChatRequest<'a> {
    pub fn new(prompt: &'a str, language: &'a str) -> Self {
        Self {
            action: SEND_MESSAGE_ACTION,
            prompt,
            language,
        }
    }
}

/// Server → client: one fragment of the answer.
#[derive(Debug, Clone, Deserialize)]
struct DeltaMessage {
    text: String,
}

/// A reassembled server message was structurally valid JSON but not a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has no string \"type\" field")]
    MissingType,
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// One server message; discriminator is the JSON "type" field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Delta(String),
    End,
    /// A kind this client does not know. Carried so callers can log it.
    Unknown(String),
}

impl ServerMessage {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, MessageError> {
        if !value.is_object() {
            return Err(MessageError::NotAnObject);
        }
        let typ = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(MessageError::MissingType)?;
        match typ {
            "delta" => {
                let m: DeltaMessage = serde_json::from_value(value.clone()).map_err(|source| {
                    MessageError::InvalidPayload {
                        kind: "delta",
                        source,
                    }
                })?;
                Ok(ServerMessage::Delta(m.text))
            }
            "end" => Ok(ServerMessage::End),
            other => Ok(ServerMessage::Unknown(other.to_string())),
        }
    }
}
