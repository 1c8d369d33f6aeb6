use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::catchup::CatchUpEvent;
use crate::chat::ChatService;
use crate::connection_manager::ConnectionRegistry;

use super::protocol::HubFrame;

/// Single catch-up session that pushes every new message to all hub connections.
///
/// Hub connections that cannot keep up are evicted instead of waited on.
pub struct HubBroadcaster {
    chat: ChatService,
    connections: Arc<ConnectionRegistry<HubFrame>>,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
}

impl HubBroadcaster {
    pub fn new(
        chat: ChatService,
        connections: Arc<ConnectionRegistry<HubFrame>>,
        heartbeat_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            chat,
            connections,
            heartbeat_interval,
            shutdown,
        }
    }

    /// Run until the shutdown token fires
    pub async fn run(self) {
        // Earlier messages reach hub clients as history on connect
        let start = self.chat.store().latest_timestamp();
        let mut catch_up = self.chat.catch_up(start, self.heartbeat_interval);

        tracing::info!(cursor = %catch_up.cursor(), "Hub broadcaster started");

        loop {
            match catch_up.next(&self.shutdown).await {
                CatchUpEvent::Messages(batch) => {
                    for message in batch {
                        let result = self
                            .connections
                            .fan_out(&HubFrame::receive_message(&message));

                        tracing::debug!(
                            message_id = %message.id,
                            delivered = result.delivered,
                            failed = result.failed,
                            lagged = result.lagged,
                            "Message broadcast to hub connections"
                        );
                    }
                }
                CatchUpEvent::Heartbeat => continue,
                CatchUpEvent::Closed => break,
            }
        }

        tracing::info!("Hub broadcaster stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_broadcasts_new_messages_to_every_connection() {
        let chat = ChatService::new();
        chat.send_message("before start", None).unwrap();

        let registry = Arc::new(ConnectionRegistry::<HubFrame>::new("hub"));
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        registry.register(tx1, CancellationToken::new());
        registry.register(tx2, CancellationToken::new());

        let shutdown = CancellationToken::new();
        let broadcaster = HubBroadcaster::new(
            chat.clone(),
            registry.clone(),
            Duration::from_secs(30),
            shutdown.clone(),
        );
        let task = tokio::spawn(broadcaster.run());

        // Wait until the broadcaster is parked on the notifier
        while chat.notifier().waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        let sent = chat.send_message("live", Some("amy")).unwrap();

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await {
                Some(HubFrame::Invocation { target, arguments }) => {
                    assert_eq!(target, "ReceiveMessage");
                    assert_eq!(arguments[0]["id"], sent.id.to_string());
                    assert_eq!(arguments[0]["content"], "live");
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        }

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_connection_does_not_block_others() {
        let chat = ChatService::new();
        let registry = Arc::new(ConnectionRegistry::<HubFrame>::new("hub"));
        let (live_tx, mut live_rx) = mpsc::channel(8);
        let (dead_tx, dead_rx) = mpsc::channel(8);
        registry.register(live_tx, CancellationToken::new());
        registry.register(dead_tx, CancellationToken::new());
        drop(dead_rx);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            HubBroadcaster::new(chat.clone(), registry.clone(), Duration::from_secs(30), shutdown.clone())
                .run(),
        );
        while chat.notifier().waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        chat.send_message("still delivered", None).unwrap();

        assert!(matches!(live_rx.recv().await, Some(HubFrame::Invocation { .. })));
        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connection_is_evicted_without_delaying_others() {
        let chat = ChatService::new();
        let registry = Arc::new(ConnectionRegistry::<HubFrame>::new("hub"));
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        slow_tx.try_send(HubFrame::Ping).unwrap();
        let slow_token = CancellationToken::new();
        let slow = registry.register(slow_tx, slow_token.clone());
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        registry.register(fast_tx, CancellationToken::new());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            HubBroadcaster::new(chat.clone(), registry.clone(), Duration::from_secs(30), shutdown.clone())
                .run(),
        );
        while chat.notifier().waiter_count() == 0 {
            tokio::task::yield_now().await;
        }

        let started = tokio::time::Instant::now();
        chat.send_message("m1", None).unwrap();
        chat.send_message("m2", None).unwrap();

        for expected in ["m1", "m2"] {
            match fast_rx.recv().await {
                Some(HubFrame::Invocation { arguments, .. }) => {
                    assert_eq!(arguments[0]["content"], expected)
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        }
        assert_eq!(started.elapsed(), Duration::ZERO);

        // The stalled client was dropped, not left connected with gaps
        assert!(slow_token.is_cancelled());
        assert!(registry.get_all_connections().iter().all(|h| h.id != slow.id));
        assert_eq!(registry.len(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }
}
