//! Graceful shutdown handling for the chat service.
//!
//! This module provides coordinated shutdown functionality that:
//! 1. Sends a close frame to every WebSocket and hub connection
//! 2. Cancels the root shutdown token, ending every pending wait
//!    (long-polls answer `[]`, SSE streams emit `disconnected`)
//! 3. Waits for push connections and notifier waiters to drain

use std::time::Duration;

use tokio::time::timeout;

use crate::server::AppState;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for clients to be notified (default: 5 seconds)
    pub client_notification_timeout: Duration,
    /// Time to wait for sessions to finish (default: 10 seconds)
    pub drain_timeout: Duration,
    /// How often the drain phase re-checks (default: 100 milliseconds)
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Handles graceful shutdown of the chat service
pub struct GracefulShutdown {
    state: AppState,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(state: AppState) -> Self {
        Self::with_config(state, ShutdownConfig::default())
    }

    pub fn with_config(state: AppState, config: ShutdownConfig) -> Self {
        Self { state, config }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(
            websocket_connections = self.state.ws_connections.len(),
            hub_connections = self.state.hub_connections.len()
        )
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason).await;

        tracing::info!("Phase 2: Cancelling pending sessions");
        self.state.shutdown.cancel();

        tracing::info!("Phase 3: Waiting for sessions to finish");
        result.connections_closed = self.wait_for_drain().await;
        result.waiters_remaining = self.state.chat.notifier().waiter_count();

        result.duration = start.elapsed();
        result.success = self.open_connections() == 0 && result.waiters_remaining == 0;

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            waiters_remaining = result.waiters_remaining,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Send the close frame on every push connection
    async fn notify_clients(&self, reason: &str) -> usize {
        let total = self.open_connections();
        if total == 0 {
            return 0;
        }

        tracing::info!(total_connections = total, "Sending close frames to clients");

        let notify = async {
            let (ws, hub) = tokio::join!(
                self.state.ws_connections.close_all(reason),
                self.state.hub_connections.close_all(reason),
            );
            ws.delivered + hub.delivered
        };

        match timeout(self.config.client_notification_timeout, notify).await {
            Ok(notified) => {
                tracing::info!(notified = notified, total = total, "Close frames sent");
                notified
            }
            Err(_) => {
                tracing::warn!(total = total, "Timed out sending close frames");
                0
            }
        }
    }

    /// Wait until every push connection is unregistered and no session is
    /// parked on the notifier. Returns the number of connections that closed.
    async fn wait_for_drain(&self) -> usize {
        let initial = self.open_connections();
        let notifier = self.state.chat.notifier();

        let drained = async {
            while self.open_connections() > 0 || notifier.waiter_count() > 0 {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        if timeout(self.config.drain_timeout, drained).await.is_err() {
            tracing::warn!(
                remaining_connections = self.open_connections(),
                remaining_waiters = notifier.waiter_count(),
                "Some sessions did not finish before the drain timeout"
            );
        }

        initial.saturating_sub(self.open_connections())
    }

    fn open_connections(&self) -> usize {
        self.state.ws_connections.len() + self.state.hub_connections.len()
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether every session finished in time
    pub success: bool,
    /// Number of push clients that received a close frame
    pub clients_notified: usize,
    /// Number of push connections that closed during the drain phase
    pub connections_closed: usize,
    /// Notifier waiters still registered when shutdown returned
    pub waiters_remaining: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catchup::CatchUpEvent;
    use crate::config::Settings;
    use crate::hub::HubFrame;
    use crate::websocket::OutboundMessage;
    use tokio::sync::mpsc;

    fn fast_config() -> ShutdownConfig {
        ShutdownConfig {
            client_notification_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_shutdown_no_connections() {
        let state = AppState::new(Settings::default());
        let shutdown = GracefulShutdown::new(state.clone());

        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert_eq!(result.clients_notified, 0);
        assert_eq!(result.connections_closed, 0);
        assert!(state.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_closes_push_connections_and_waiters() {
        let state = AppState::new(Settings::default());

        // Push sessions that unregister once their token is cancelled
        let (ws_tx, mut ws_rx) = mpsc::channel::<OutboundMessage>(4);
        let ws = state
            .ws_connections
            .register(ws_tx, state.shutdown.child_token());
        let (hub_tx, mut hub_rx) = mpsc::channel::<HubFrame>(4);
        let hub = state
            .hub_connections
            .register(hub_tx, state.shutdown.child_token());
        let ws_session = {
            let state = state.clone();
            let (token, id) = (ws.cancellation().clone(), ws.id);
            tokio::spawn(async move {
                token.cancelled().await;
                state.ws_connections.unregister(id);
            })
        };
        let hub_session = {
            let state = state.clone();
            let (token, id) = (hub.cancellation().clone(), hub.id);
            tokio::spawn(async move {
                token.cancelled().await;
                state.hub_connections.unregister(id);
            })
        };

        // A parked long-poll
        let chat = state.chat.clone();
        let root = state.shutdown.clone();
        let long_poll = tokio::spawn(async move {
            let mut catch_up = chat.catch_up(None, Duration::from_secs(30));
            catch_up.next(&root).await
        });
        while state.chat.notifier().waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        let result = GracefulShutdown::with_config(state.clone(), fast_config())
            .execute("Server shutting down")
            .await;

        assert!(result.success);
        assert_eq!(result.clients_notified, 2);
        assert_eq!(result.connections_closed, 2);
        assert_eq!(result.waiters_remaining, 0);
        assert_eq!(
            ws_rx.recv().await,
            Some(OutboundMessage::Close { reason: "Server shutting down".to_string() })
        );
        assert!(matches!(hub_rx.recv().await, Some(HubFrame::Close { .. })));
        assert_eq!(long_poll.await.unwrap(), CatchUpEvent::Closed);
        ws_session.await.unwrap();
        hub_session.await.unwrap();
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.client_notification_timeout, Duration::from_secs(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
    }
}
