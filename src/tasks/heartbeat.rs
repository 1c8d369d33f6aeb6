use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::WebSocketConfig;
use crate::connection_manager::{ConnectionRegistry, OutboundFrame};
use crate::hub::HubFrame;
use crate::metrics::HeartbeatMetrics;
use crate::websocket::OutboundMessage;

/// Background task for push-connection heartbeats and stale cleanup
pub struct HeartbeatTask {
    config: WebSocketConfig,
    ws_connections: Arc<ConnectionRegistry<OutboundMessage>>,
    hub_connections: Arc<ConnectionRegistry<HubFrame>>,
    shutdown: CancellationToken,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        ws_connections: Arc<ConnectionRegistry<OutboundMessage>>,
        hub_connections: Arc<ConnectionRegistry<HubFrame>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            ws_connections,
            hub_connections,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup loops until shutdown
    pub async fn run(self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval);
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Ping every WebSocket and hub connection
    async fn send_heartbeats(&self) {
        let total = self.ws_connections.len() + self.hub_connections.len();
        if total == 0 {
            return;
        }

        let start = Instant::now();
        let (ws, hub) = tokio::join!(
            self.ws_connections.broadcast(OutboundMessage::heartbeat()),
            self.hub_connections.broadcast(HubFrame::heartbeat()),
        );

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let timed_out = ws.timed_out + hub.timed_out;

        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        if timed_out > 0 {
            HeartbeatMetrics::record_timeouts(timed_out as u64);
        }

        tracing::debug!(
            total = total,
            sent = ws.delivered + hub.delivered,
            failed = ws.failed + hub.failed,
            timed_out = timed_out,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        // Warn if heartbeat round is taking too long
        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                connections = total,
                "Heartbeat round took more than 50% of interval"
            );
        }
    }

    /// Evict connections with no inbound activity within the timeout
    fn cleanup_stale_connections(&self, timeout_secs: u64) {
        let removed = self.ws_connections.cleanup_stale_connections(timeout_secs)
            + self.hub_connections.cleanup_stale_connections(timeout_secs);

        if removed > 0 {
            HeartbeatMetrics::record_stale_removed(removed as u64);
            tracing::info!(
                removed = removed,
                timeout_secs = timeout_secs,
                "Cleaned up stale connections"
            );
        }
    }
}
