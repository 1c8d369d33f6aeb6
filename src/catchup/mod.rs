//! Cursor-based catch-up shared by every transport that waits for news.
//!
//! Long-polling takes a single step, SSE and WebSocket sessions loop, and the
//! hub broadcaster loops on behalf of all hub connections.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::notifier::{ChangeNotifier, WaitOutcome};
use crate::store::{beginning_of_time, Message, MessageStore};

/// Watermark of what one session has already delivered.
///
/// Besides the timestamp it keeps the ids delivered at exactly that
/// timestamp, so messages sharing a clock tick are neither skipped nor
/// delivered twice. The id set is cleared every time the position moves.
#[derive(Debug, Clone)]
pub struct Cursor {
    position: DateTime<Utc>,
    delivered_at_position: HashSet<Uuid>,
}

impl Cursor {
    pub fn beginning() -> Self {
        Self::starting_at(beginning_of_time())
    }

    /// A cursor for a client that has seen everything up to and including `since`
    pub fn starting_at(since: DateTime<Utc>) -> Self {
        Self {
            position: since,
            delivered_at_position: HashSet::new(),
        }
    }

    pub fn position(&self) -> DateTime<Utc> {
        self.position
    }

    /// Record `message` as delivered. The position never moves backwards.
    pub fn advance(&mut self, message: &Message) {
        if message.timestamp > self.position {
            self.position = message.timestamp;
            self.delivered_at_position.clear();
        }
        if message.timestamp == self.position {
            self.delivered_at_position.insert(message.id);
        }
    }

    /// Take every stored message this cursor has not delivered yet and advance past them
    pub fn collect(&mut self, store: &MessageStore) -> Vec<Message> {
        let fresh: Vec<Message> = if self.delivered_at_position.is_empty() {
            store.after(self.position)
        } else {
            store
                .from(self.position)
                .into_iter()
                .filter(|m| {
                    !(m.timestamp == self.position && self.delivered_at_position.contains(&m.id))
                })
                .collect()
        };

        for message in &fresh {
            self.advance(message);
        }

        fresh
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::beginning()
    }
}

/// Result of one catch-up step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchUpEvent {
    /// New messages, oldest first. Never empty.
    Messages(Vec<Message>),
    /// Nothing new within the heartbeat interval
    Heartbeat,
    /// The cancellation token fired; the session should end
    Closed,
}

/// One session's position in the message log plus the means to wait for more
pub struct CatchUp {
    store: Arc<MessageStore>,
    notifier: Arc<ChangeNotifier>,
    cursor: Cursor,
    heartbeat_interval: Duration,
}

impl CatchUp {
    pub fn new(
        store: Arc<MessageStore>,
        notifier: Arc<ChangeNotifier>,
        since: Option<DateTime<Utc>>,
        heartbeat_interval: Duration,
    ) -> Self {
        let cursor = since.map(Cursor::starting_at).unwrap_or_default();
        Self {
            store,
            notifier,
            cursor,
            heartbeat_interval,
        }
    }

    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor.position()
    }

    /// Everything already available, without waiting
    pub fn take_pending(&mut self) -> Vec<Message> {
        self.cursor.collect(&self.store)
    }

    /// Wait for the next batch of messages, a heartbeat, or cancellation.
    ///
    /// Returns immediately when messages are already pending. A signal that
    /// turns out to carry nothing for this cursor keeps waiting until the
    /// first heartbeat deadline.
    pub async fn next(&mut self, cancel: &CancellationToken) -> CatchUpEvent {
        let deadline = Instant::now() + self.heartbeat_interval;

        loop {
            let subscription = self.notifier.subscribe();

            let batch = self.cursor.collect(&self.store);
            if !batch.is_empty() {
                return CatchUpEvent::Messages(batch);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match subscription.wait(remaining, cancel).await {
                WaitOutcome::Signaled => continue,
                WaitOutcome::TimedOut => return CatchUpEvent::Heartbeat,
                WaitOutcome::Cancelled => return CatchUpEvent::Closed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEARTBEAT: Duration = Duration::from_secs(30);

    fn fixed_instant() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn components() -> (Arc<MessageStore>, Arc<ChangeNotifier>) {
        (Arc::new(MessageStore::new()), Arc::new(ChangeNotifier::new()))
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let store = MessageStore::new();
        let old = store.append("old", None).unwrap();
        let new = store.append("new", None).unwrap();

        let mut cursor = Cursor::beginning();
        cursor.advance(&new);
        cursor.advance(&old);
        assert_eq!(cursor.position(), new.timestamp);
    }

    #[test]
    fn test_cursor_picks_up_same_tick_siblings() {
        let store = MessageStore::with_clock(fixed_instant);
        let mut cursor = Cursor::beginning();

        store.append("hi", Some("alice")).unwrap();
        assert_eq!(contents(&cursor.collect(&store)), vec!["hi"]);

        // Same timestamp as the one already delivered
        store.append("yo", Some("bob")).unwrap();
        assert_eq!(contents(&cursor.collect(&store)), vec!["yo"]);

        assert!(cursor.collect(&store).is_empty());
    }

    #[test]
    fn test_cursor_starting_at_excludes_that_instant() {
        let store = MessageStore::with_clock(fixed_instant);
        store.append("seen", None).unwrap();

        let mut cursor = Cursor::starting_at(fixed_instant());
        assert!(cursor.collect(&store).is_empty());
    }

    #[tokio::test]
    async fn test_pending_backlog_returns_immediately() {
        let (store, notifier) = components();
        store.append("one", None).unwrap();
        store.append("two", None).unwrap();

        let mut catch_up = CatchUp::new(store, notifier.clone(), None, HEARTBEAT);
        let event = catch_up.next(&CancellationToken::new()).await;

        match event {
            CatchUpEvent::Messages(batch) => assert_eq!(contents(&batch), vec!["one", "two"]),
            other => panic!("expected messages, got {:?}", other),
        }
        assert_eq!(notifier.waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_gets_heartbeat() {
        let (store, notifier) = components();
        let mut catch_up = CatchUp::new(store, notifier, Some(Utc::now()), HEARTBEAT);

        let start = Instant::now();
        assert_eq!(
            catch_up.next(&CancellationToken::new()).await,
            CatchUpEvent::Heartbeat
        );
        assert!(start.elapsed() >= HEARTBEAT);
    }

    #[tokio::test]
    async fn test_cancelled_session_closes() {
        let (store, notifier) = components();
        let cancel = CancellationToken::new();
        let mut catch_up = CatchUp::new(store, notifier.clone(), None, HEARTBEAT);

        let token = cancel.clone();
        let handle = tokio::spawn(async move { catch_up.next(&token).await });

        while notifier.waiter_count() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), CatchUpEvent::Closed);
        assert_eq!(notifier.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_append_wakes_waiting_session() {
        let (store, notifier) = components();
        let mut catch_up = CatchUp::new(store.clone(), notifier.clone(), None, HEARTBEAT);
        let handle = tokio::spawn(async move { catch_up.next(&CancellationToken::new()).await });

        while notifier.waiter_count() == 0 {
            tokio::task::yield_now().await;
        }
        store.append("wake up", None).unwrap();
        notifier.signal();

        match handle.await.unwrap() {
            CatchUpEvent::Messages(batch) => assert_eq!(contents(&batch), vec!["wake up"]),
            other => panic!("expected messages, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_session_sees_every_message_once_in_order() {
        const SESSIONS: usize = 8;
        const SENDERS: usize = 4;
        const PER_SENDER: usize = 50;
        const TOTAL: usize = SENDERS * PER_SENDER;

        let (store, notifier) = components();
        let cancel = CancellationToken::new();

        let sessions: Vec<_> = (0..SESSIONS)
            .map(|_| {
                let mut catch_up =
                    CatchUp::new(store.clone(), notifier.clone(), None, Duration::from_secs(5));
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut seen: Vec<Message> = Vec::new();
                    while seen.len() < TOTAL {
                        match catch_up.next(&cancel).await {
                            CatchUpEvent::Messages(batch) => seen.extend(batch),
                            CatchUpEvent::Heartbeat => continue,
                            CatchUpEvent::Closed => break,
                        }
                    }
                    seen
                })
            })
            .collect();

        let senders: Vec<_> = (0..SENDERS)
            .map(|s| {
                let store = store.clone();
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    for i in 0..PER_SENDER {
                        store.append(&format!("{}-{}", s, i), None).unwrap();
                        notifier.signal();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for sender in senders {
            sender.await.unwrap();
        }

        let expected: Vec<Uuid> = store.after(beginning_of_time()).iter().map(|m| m.id).collect();
        assert_eq!(expected.len(), TOTAL);

        for session in sessions {
            let seen = tokio::time::timeout(Duration::from_secs(10), session)
                .await
                .expect("session should finish")
                .unwrap();
            let ids: Vec<Uuid> = seen.iter().map(|m| m.id).collect();
            assert_eq!(ids, expected);
        }
    }
}
