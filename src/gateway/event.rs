//! Feishu event-subscription payloads.
//!
//! The subscription endpoint receives two shapes: a flat `url_verification`
//! handshake and schema-2.0 events with a `header` block. Message content
//! itself is double-encoded JSON inside the event.

use serde::Deserialize;
use serde_json::Value;

use crate::chat::{IncomingMessage, MessageContent};
use crate::error::ChatError;

#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
    /// Verification token as `url_verification` carries it.
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    pub header: Option<EventHeader>,
    #[serde(default)]
    pub event: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub token: String,
}

impl EventEnvelope {
    pub fn is_url_verification(&self) -> bool {
        self.kind.as_deref() == Some("url_verification")
    }

    /// The verification token, wherever this payload shape carries it.
    pub fn verification_token(&self) -> &str {
        if let Some(header) = &self.header
            && !header.token.is_empty()
        {
            return &header.token;
        }
        self.token.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    sender: Sender,
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Sender {
    sender_id: SenderId,
}

#[derive(Debug, Default, Deserialize)]
struct SenderId {
    #[serde(default)]
    open_id: String,
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: String,
    message_type: String,
    content: String,
}

/// Decodes an `im.message.receive_v1` event body into a chat message.
pub fn decode_message(event_id: &str, event: &Value) -> Result<IncomingMessage, ChatError> {
    let parsed: MessageEvent = serde_json::from_value(event.clone())
        .map_err(|e| ChatError::UnsupportedMessage(format!("bad message event: {e}")))?;
    let content: Value = serde_json::from_str(&parsed.message.content)
        .map_err(|e| ChatError::UnsupportedMessage(format!("message content not json: {e}")))?;

    let content = match parsed.message.message_type.as_str() {
        "text" => MessageContent::Text(
            content["text"].as_str().unwrap_or_default().to_string(),
        ),
        "file" => MessageContent::File {
            file_key: content["file_key"].as_str().unwrap_or_default().to_string(),
            file_name: content["file_name"].as_str().unwrap_or("附件").to_string(),
            resource_type: "file".to_string(),
        },
        "image" => MessageContent::File {
            file_key: content["image_key"].as_str().unwrap_or_default().to_string(),
            file_name: "图片".to_string(),
            resource_type: "image".to_string(),
        },
        other => MessageContent::Unsupported(other.to_string()),
    };

    Ok(IncomingMessage {
        event_id: event_id.to_string(),
        message_id: parsed.message.message_id,
        open_id: parsed.sender.sender_id.open_id,
        user_id: parsed.sender.sender_id.user_id,
        content,
    })
}
