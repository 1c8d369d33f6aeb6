use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics::{BroadcastMetrics, ConnectionMetrics};

use super::stats::ConnectionStats;
use super::types::{BroadcastResult, ConnectionHandle, OutboundFrame};

/// Timeout for a single queued send during a broadcast
const BROADCAST_SEND_TIMEOUT_MS: u64 = 5000;

/// Maximum concurrent sends per broadcast batch
const MAX_CONCURRENT_SENDS: usize = 1000;

/// Manages all active connections of one push transport
pub struct ConnectionRegistry<F> {
    transport: &'static str,
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle<F>>>,
}

impl<F: OutboundFrame> ConnectionRegistry<F> {
    pub fn new(transport: &'static str) -> Self {
        Self {
            transport,
            connections: DashMap::new(),
        }
    }

    /// Register a new connection
    pub fn register(
        &self,
        sender: mpsc::Sender<F>,
        cancel: CancellationToken,
    ) -> Arc<ConnectionHandle<F>> {
        let handle = Arc::new(ConnectionHandle::new(sender, cancel));
        self.connections.insert(handle.id, handle.clone());

        ConnectionMetrics::opened(self.transport);
        tracing::info!(
            connection_id = %handle.id,
            transport = self.transport,
            total = self.connections.len(),
            "Connection registered"
        );

        handle
    }

    /// Unregister a connection. Returns the handle if it was still registered.
    pub fn unregister(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle<F>>> {
        let (_, handle) = self.connections.remove(&connection_id)?;

        let duration = Utc::now()
            .signed_duration_since(handle.connected_at)
            .num_milliseconds() as f64
            / 1000.0;
        ConnectionMetrics::closed(self.transport, duration);
        tracing::info!(
            connection_id = %connection_id,
            transport = self.transport,
            duration_secs = duration,
            "Connection unregistered"
        );

        Some(handle)
    }

    #[cfg(test)]
    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle<F>>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle<F>>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue `frame` on every registered connection.
    ///
    /// Sends run concurrently in batches. A connection whose receiver is gone
    /// is unregistered; a full buffer that does not drain within the send
    /// timeout is counted and skipped. Neither affects the other recipients.
    pub async fn broadcast(&self, frame: F) -> BroadcastResult {
        let connections = self.get_all_connections();
        let mut result = BroadcastResult::default();

        for batch in connections.chunks(MAX_CONCURRENT_SENDS) {
            let sends = batch.iter().map(|handle| {
                let frame = frame.clone();
                async move {
                    let send_timeout = Duration::from_millis(BROADCAST_SEND_TIMEOUT_MS);
                    (handle.id, timeout(send_timeout, handle.send(frame)).await)
                }
            });

            for (connection_id, outcome) in join_all(sends).await {
                match outcome {
                    Ok(Ok(())) => result.delivered += 1,
                    Ok(Err(_)) => {
                        result.failed += 1;
                        tracing::debug!(
                            connection_id = %connection_id,
                            transport = self.transport,
                            "Receiver dropped, removing connection"
                        );
                        self.unregister(connection_id);
                    }
                    Err(_) => {
                        result.timed_out += 1;
                        tracing::warn!(
                            connection_id = %connection_id,
                            transport = self.transport,
                            timeout_ms = BROADCAST_SEND_TIMEOUT_MS,
                            "Send timed out, connection buffer is full"
                        );
                    }
                }
            }
        }

        BroadcastMetrics::record_delivered(result.delivered as u64);
        if result.failed + result.timed_out > 0 {
            BroadcastMetrics::record_failed((result.failed + result.timed_out) as u64);
        }

        result
    }

    /// Queue `frame` on every connection without waiting.
    ///
    /// A connection whose buffer is full is evicted rather than skipped, so a
    /// client that stays connected never silently misses a frame. Evicted
    /// sessions end and the client reconnects. Nothing here waits on a slow
    /// receiver.
    pub fn fan_out(&self, frame: &F) -> BroadcastResult {
        let mut result = BroadcastResult::default();

        for handle in self.get_all_connections() {
            match handle.sender.try_send(frame.clone()) {
                Ok(()) => result.delivered += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    result.failed += 1;
                    self.unregister(handle.id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    result.lagged += 1;
                    tracing::warn!(
                        connection_id = %handle.id,
                        transport = self.transport,
                        "Connection buffer full, evicting lagging connection"
                    );
                    if self.unregister(handle.id).is_some() {
                        handle.close();
                    }
                }
            }
        }

        BroadcastMetrics::record_delivered(result.delivered as u64);
        if result.failed + result.lagged > 0 {
            BroadcastMetrics::record_failed((result.failed + result.lagged) as u64);
        }

        result
    }

    /// Send the shutdown frame to every connection, then cancel each session
    pub async fn close_all(&self, reason: &str) -> BroadcastResult {
        let result = self.broadcast(F::shutdown(reason)).await;
        for handle in self.get_all_connections() {
            handle.close();
        }
        result
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            transport: self.transport,
            total_connections: self.connections.len(),
            oldest_connected_at: self.connections.iter().map(|r| r.connected_at).min(),
        }
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove and close stale connections, returning how many were removed
    pub fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let stale = self.find_stale_connections(timeout_secs);
        let mut removed = 0;

        for conn_id in stale {
            if let Some(handle) = self.unregister(conn_id) {
                tracing::info!(
                    connection_id = %conn_id,
                    transport = self.transport,
                    "Removing stale connection due to timeout"
                );
                // Best effort; a full buffer means the peer is not reading anyway
                let _ = handle.sender.try_send(F::shutdown("Connection timed out"));
                handle.close();
                removed += 1;
            }
        }

        removed
    }
}
