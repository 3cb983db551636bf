//! WebSocket Message Types
//!
//! Defines the inbound chat input sent by clients and the chat message
//! fanned out to every connected client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body value clients send to announce that their user is typing
pub const TYPING_SENTINEL: &str = "{{typing}}";

/// Message sent from client to server
///
/// Only the `chatinput` field is read. Extra fields (such as the `HEADERS`
/// object htmx attaches to `ws-send` payloads) are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInput {
    /// Text typed by the user
    pub chatinput: String,
}

impl ChatInput {
    /// Parse a text frame, returning `None` for anything that is not a JSON
    /// object carrying a string `chatinput` field.
    ///
    /// A repeated key keeps its last value.
    pub fn parse(text: &str) -> Option<Self> {
        let Value::Object(mut fields) = serde_json::from_str(text).ok()? else {
            return None;
        };
        match fields.remove("chatinput")? {
            Value::String(chatinput) => Some(Self { chatinput }),
            _ => None,
        }
    }
}

/// Message fanned out to every connected client
///
/// The wire field names are capitalized to match existing clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned identity of the sending session
    #[serde(rename = "Sender")]
    pub sender: String,
    /// Opaque client-supplied text
    #[serde(rename = "Message")]
    pub body: String,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
        }
    }

    /// Whether this message is a typing notification rather than chat text
    pub fn is_typing(&self) -> bool {
        self.body == TYPING_SENTINEL
    }
}
