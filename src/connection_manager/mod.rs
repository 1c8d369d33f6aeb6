//! Connection registries for the push transports (WebSocket and hub)

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::ConnectionStats;
pub use types::{BroadcastResult, ConnectionHandle, OutboundFrame};
