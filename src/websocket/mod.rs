mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{OutboundMessage, ServerMessage};

/// Transport label used in registries, metrics and logs
pub const TRANSPORT: &str = "websocket";
