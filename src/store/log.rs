use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::message::{normalize_sender, Message};
use super::StoreError;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The earliest representable instant, used as the "nothing seen yet" cursor
pub fn beginning_of_time() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

/// Process-wide append-only message log.
///
/// Messages are kept in append order. Timestamps are assigned while the
/// write lock is held and never go backwards, so append order is also
/// timestamp order and range queries can binary search.
pub struct MessageStore {
    messages: RwLock<Vec<Message>>,
    clock: Clock,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Create a store that reads time from `clock` instead of the system clock
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            messages: RwLock::new(Vec::new()),
            clock: Box::new(clock),
        }
    }

    /// Append a new message and return it.
    ///
    /// Fails with [`StoreError::InvalidArgument`] when `content` is blank.
    pub fn append(&self, content: &str, sender: Option<&str>) -> Result<Message, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "Message content must not be empty".to_string(),
            ));
        }

        let sender = normalize_sender(sender);
        let mut messages = self.messages.write();

        let now = (self.clock)();
        let timestamp = match messages.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let message = Message {
            id: Uuid::new_v4(),
            content: content.to_string(),
            sender,
            timestamp,
        };
        messages.push(message.clone());

        Ok(message)
    }

    /// All messages with a timestamp strictly greater than `since`, oldest first
    pub fn after(&self, since: DateTime<Utc>) -> Vec<Message> {
        let messages = self.messages.read();
        let start = messages.partition_point(|m| m.timestamp <= since);
        messages[start..].to_vec()
    }

    /// All messages with a timestamp greater than or equal to `since`, oldest first
    pub fn from(&self, since: DateTime<Utc>) -> Vec<Message> {
        let messages = self.messages.read();
        let start = messages.partition_point(|m| m.timestamp < since);
        messages[start..].to_vec()
    }

    /// Timestamp of the most recent message, if any
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.read().last().map(|m| m.timestamp)
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn fixed_instant() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00.123Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_append_assigns_fields() {
        let store = MessageStore::new();
        let message = store.append("hello", Some("alice")).unwrap();

        assert_eq!(message.content, "hello");
        assert_eq!(message.sender, "alice");
        assert_eq!(store.len(), 1);
        assert_eq!(store.latest_timestamp(), Some(message.timestamp));
    }

    #[test]
    fn test_append_defaults_sender() {
        let store = MessageStore::new();
        assert_eq!(store.append("hi", None).unwrap().sender, "Anonymous");
        assert_eq!(store.append("hi", Some("  ")).unwrap().sender, "Anonymous");
        assert_eq!(store.append("hi", Some(" Dr. Who ")).unwrap().sender, " Dr. Who ");
    }

    #[test]
    fn test_append_rejects_blank_content() {
        let store = MessageStore::new();

        for content in ["", "   ", "\n\t"] {
            let err = store.append(content, Some("alice")).unwrap_err();
            assert!(matches!(err, StoreError::InvalidArgument(_)));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_same_tick_keeps_append_order() {
        let store = MessageStore::with_clock(fixed_instant);
        let hi = store.append("hi", Some("alice")).unwrap();
        let yo = store.append("yo", Some("bob")).unwrap();
        assert_eq!(hi.timestamp, yo.timestamp);

        let all = store.after(beginning_of_time());
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "yo"]);
    }

    #[test]
    fn test_after_is_strict() {
        let store = MessageStore::new();
        let first = store.append("one", None).unwrap();
        store.append("two", None).unwrap();

        for message in store.after(first.timestamp) {
            assert!(message.timestamp > first.timestamp);
        }
        assert!(store.after(store.latest_timestamp().unwrap()).is_empty());
    }

    #[test]
    fn test_from_includes_equal_timestamps() {
        let store = MessageStore::with_clock(fixed_instant);
        store.append("a", None).unwrap();
        store.append("b", None).unwrap();

        assert_eq!(store.from(fixed_instant()).len(), 2);
        assert!(store.after(fixed_instant()).is_empty());
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let ticks = Arc::new(parking_lot::Mutex::new(vec![
            fixed_instant() - chrono::Duration::seconds(5),
            fixed_instant(),
        ]));
        let clock_ticks = ticks.clone();
        let store = MessageStore::with_clock(move || {
            clock_ticks.lock().pop().unwrap_or_else(fixed_instant)
        });

        let first = store.append("first", None).unwrap();
        let second = store.append("second", None).unwrap();
        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn test_after_is_idempotent() {
        let store = MessageStore::new();
        store.append("one", None).unwrap();
        store.append("two", None).unwrap();

        assert_eq!(
            store.after(beginning_of_time()),
            store.after(beginning_of_time())
        );
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(MessageStore::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        store.append(&format!("{}-{}", t, i), None).unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let all = store.after(beginning_of_time());
        assert_eq!(all.len(), 2000);

        let ids: HashSet<_> = all.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 2000);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
