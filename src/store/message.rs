use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender name used when a message arrives without one
pub const ANONYMOUS_SENDER: &str = "Anonymous";

/// A chat message as stored and delivered to every transport.
///
/// Instances are only created by [`MessageStore::append`](super::MessageStore::append),
/// which assigns the id and the timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

/// Body accepted by every `send` endpoint and by WebSocket text frames
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender: Option<String>,
}

/// Blank or missing senders become [`ANONYMOUS_SENDER`]; any other sender is kept as given
pub(crate) fn normalize_sender(sender: Option<&str>) -> String {
    match sender {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => ANONYMOUS_SENDER.to_string(),
    }
}
