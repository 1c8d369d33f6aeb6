use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Timing for long-polling and server-sent event sessions
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Idle seconds before an SSE stream emits a heartbeat event
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Seconds a long-poll request is held open before answering `[]`
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout: u64,
}

/// Settings shared by the WebSocket and hub connection registries
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends ping)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup task interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Outbound frames buffered per connection
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// How far back the history sent on connect and by `GetRecentMessages` reaches
    #[serde(default = "default_recent_history_seconds")]
    pub recent_history_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Emit one JSON object per line instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// 100 years
const MAX_RECENT_HISTORY_SECONDS: u64 = 100 * 365 * 24 * 3600;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_long_poll_timeout() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_channel_buffer() -> usize {
    32
}

fn default_recent_history_seconds() -> u64 {
    3600 // 1 hour
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "chat-fanout-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("stream.heartbeat_interval", 30)?
            .set_default("stream.long_poll_timeout", 30)?
            .set_default("websocket.heartbeat_interval", 30)?
            .set_default("websocket.connection_timeout", 120)?
            .set_default("websocket.cleanup_interval", 60)?
            .set_default("hub.recent_history_seconds", 3600)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, STREAM__LONG_POLL_TIMEOUT, SERVER__CORS_ORIGINS=a,b, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would only fail once connections arrive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.websocket.channel_buffer == 0 {
            return Err(ConfigError::Message(
                "websocket.channel_buffer must be greater than 0".to_string(),
            ));
        }

        if self.hub.recent_history_seconds > MAX_RECENT_HISTORY_SECONDS {
            return Err(ConfigError::Message(format!(
                "hub.recent_history_seconds must be at most {}",
                MAX_RECENT_HISTORY_SECONDS
            )));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl StreamConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn long_poll(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout)
    }
}

impl WebSocketConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }
}

impl HubConfig {
    pub fn recent_history(&self) -> chrono::Duration {
        i64::try_from(self.recent_history_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            long_poll_timeout: default_long_poll_timeout(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            recent_history_seconds: default_recent_history_seconds(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8081);
        assert!(settings.server.cors_origins.is_empty());
        assert_eq!(settings.stream.heartbeat(), Duration::from_secs(30));
        assert_eq!(settings.stream.long_poll(), Duration::from_secs(30));
        assert_eq!(settings.websocket.channel_buffer, 32);
        assert_eq!(settings.hub.recent_history(), chrono::Duration::hours(1));
        assert!(!settings.otel.enabled);
        assert!(!settings.log.json);
    }

    #[test]
    fn test_server_addr() {
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".to_string();
        settings.server.port = 5000;
        assert_eq!(settings.server_addr(), "127.0.0.1:5000");
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"stream":{"long_poll_timeout":5}}"#).unwrap();
        assert_eq!(settings.stream.long_poll_timeout, 5);
        assert_eq!(settings.stream.heartbeat_interval, 30);
        assert_eq!(settings.server.port, 8081);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_channel_buffer() {
        let mut settings = Settings::default();
        settings.websocket.channel_buffer = 0;

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("channel_buffer"));
    }

    #[test]
    fn test_validate_rejects_huge_history_window() {
        let mut settings = Settings::default();
        settings.hub.recent_history_seconds = u64::MAX;

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("recent_history_seconds"));
        // Still no panic when converted
        assert_eq!(settings.hub.recent_history(), chrono::Duration::MAX);
    }
}
