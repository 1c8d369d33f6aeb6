//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Frames a push transport can queue for one of its connections.
///
/// The registry only needs to build the two control frames it sends on its
/// own; everything else is produced by the transport.
pub trait OutboundFrame: Clone + Send + Sync + 'static {
    /// Keep-alive frame sent by the heartbeat task
    fn heartbeat() -> Self;

    /// Final frame sent before the server closes the connection
    fn shutdown(reason: &str) -> Self;
}

/// Handle for a single push connection
pub struct ConnectionHandle<F> {
    pub id: Uuid,
    pub sender: mpsc::Sender<F>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    /// Cancelled when the server wants this connection gone
    cancel: CancellationToken,
}

impl<F: OutboundFrame> ConnectionHandle<F> {
    pub fn new(sender: mpsc::Sender<F>, cancel: CancellationToken) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            cancel,
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Queue a frame, waiting for buffer space
    pub async fn send(&self, frame: F) -> Result<(), mpsc::error::SendError<F>> {
        self.sender.send(frame).await
    }

    /// Token the session loops select on
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the session owning this handle to end
    pub fn close(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn last_activity_for_test(&self, at: DateTime<Utc>) {
        self.last_activity.store(at.timestamp(), Ordering::Relaxed);
    }
}

/// Outcome of a registry broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    pub delivered: usize,
    /// Receiver gone; the connection was unregistered
    pub failed: usize,
    pub timed_out: usize,
    /// Buffer full during a fan-out; the connection was evicted
    pub lagged: usize,
}
