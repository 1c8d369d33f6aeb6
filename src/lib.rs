// Infrastructure layer (shared components)
pub mod infrastructure;

// Re-export infrastructure modules at the crate root
pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;

// Core: message log, change notification, catch-up
pub mod catchup;
pub mod chat;
pub mod notifier;
pub mod store;

// Application layer
pub mod api;
pub mod connection_manager;
pub mod hub;
pub mod server;
pub mod sse;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
