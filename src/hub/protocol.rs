//! JSON frames exchanged on `/hubs/messages`.
//!
//! Clients invoke named server methods; the server answers by invoking named
//! client events. One frame per WebSocket text message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection_manager::OutboundFrame;
use crate::store::Message;

/// Client events the hub invokes
pub mod events {
    pub const CONNECTED: &str = "Connected";
    pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
    pub const MESSAGES_HISTORY: &str = "MessagesHistory";
    pub const ERROR: &str = "Error";
}

/// Server methods a client may invoke
pub mod methods {
    pub const SEND_MESSAGE: &str = "SendMessage";
    pub const GET_MESSAGES: &str = "GetMessages";
    pub const GET_RECENT_MESSAGES: &str = "GetRecentMessages";
}

/// Frames sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Invocation {
        #[serde(rename = "invocationId", default, skip_serializing_if = "Option::is_none")]
        invocation_id: Option<String>,
        target: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },
    Ping,
    Close,
}

/// Frames sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubFrame {
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        #[serde(rename = "invocationId")]
        invocation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Ping,
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "allowReconnect")]
        allow_reconnect: bool,
    },
}

impl HubFrame {
    pub fn invoke(target: &str, arguments: Vec<Value>) -> Self {
        Self::Invocation {
            target: target.to_string(),
            arguments,
        }
    }

    pub fn connected(connection_id: &str) -> Self {
        Self::invoke(
            events::CONNECTED,
            vec![Value::String(format!("Connection ID: {}", connection_id))],
        )
    }

    pub fn receive_message(message: &Message) -> Self {
        Self::invoke(events::RECEIVE_MESSAGE, vec![to_value(message)])
    }

    pub fn messages_history(messages: &[Message]) -> Self {
        Self::invoke(events::MESSAGES_HISTORY, vec![to_value(messages)])
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::invoke(events::ERROR, vec![Value::String(message.into())])
    }

    pub fn completion(invocation_id: String, error: Option<String>) -> Self {
        Self::Completion {
            invocation_id,
            error,
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }
}

impl OutboundFrame for HubFrame {
    fn heartbeat() -> Self {
        HubFrame::Ping
    }

    fn shutdown(reason: &str) -> Self {
        HubFrame::Close {
            error: Some(reason.to_string()),
            allow_reconnect: true,
        }
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Value {
    // Message serialization has no failure path
    serde_json::to_value(value).unwrap_or(Value::Null)
}
