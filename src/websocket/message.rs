use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection_manager::OutboundFrame;
use crate::store::Message;

/// Text frames sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Connected {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Message {
        data: Message,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn connected() -> Self {
        Self::Connected {
            message: "WebSocket connection established".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn message(data: Message) -> Self {
        Self::Message { data }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Everything the send task may write to the socket
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Frame(ServerMessage),
    Ping,
    Close { reason: String },
}

impl From<ServerMessage> for OutboundMessage {
    fn from(msg: ServerMessage) -> Self {
        OutboundMessage::Frame(msg)
    }
}

impl OutboundFrame for OutboundMessage {
    fn heartbeat() -> Self {
        OutboundMessage::Ping
    }

    fn shutdown(reason: &str) -> Self {
        OutboundMessage::Close {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connected_frame_shape() {
        let value = serde_json::to_value(ServerMessage::connected()).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["message"], "WebSocket connection established");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_message_frame_wraps_data() {
        let msg = Message {
            id: uuid::Uuid::new_v4(),
            content: "hi".to_string(),
            sender: "bob".to_string(),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(ServerMessage::message(msg.clone())).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["data"]["content"], "hi");
        assert_eq!(value["data"]["sender"], "bob");
    }

    #[test]
    fn test_error_frame() {
        let value = serde_json::to_value(ServerMessage::error("VALIDATION_ERROR", "empty")).unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "code": "VALIDATION_ERROR", "message": "empty"})
        );
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(OutboundMessage::heartbeat(), OutboundMessage::Ping);
        assert_eq!(
            OutboundMessage::shutdown("bye"),
            OutboundMessage::Close { reason: "bye".to_string() }
        );
    }
}
