mod settings;

pub use settings::{HubConfig, LogConfig, OtelConfig, ServerConfig, Settings, StreamConfig, WebSocketConfig};
