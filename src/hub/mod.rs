//! Hub-style push transport: method invocations over a WebSocket.

mod broadcaster;
mod handler;
mod protocol;

pub use broadcaster::HubBroadcaster;
pub use handler::{hub_handler, MessagesHub};
pub use protocol::{events, methods, ClientFrame, HubFrame};

/// Transport label used in registries, metrics and logs
pub const TRANSPORT: &str = "hub";
