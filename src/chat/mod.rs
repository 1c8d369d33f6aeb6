//! Core boundary used by every transport adapter.
//!
//! Sending appends to the store and then signals the notifier, so any
//! session woken by the signal already sees the new message.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::catchup::CatchUp;
use crate::metrics::MessageMetrics;
use crate::notifier::{ChangeNotifier, Subscription};
use crate::store::{beginning_of_time, Message, MessageStore, StoreError};

#[derive(Clone, Default)]
pub struct ChatService {
    store: Arc<MessageStore>,
    notifier: Arc<ChangeNotifier>,
}

impl ChatService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_components(store: Arc<MessageStore>, notifier: Arc<ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Store a message and wake every waiting session
    #[tracing::instrument(name = "chat.send", skip(self, content), fields(content_len = content.len()))]
    pub fn send_message(&self, content: &str, sender: Option<&str>) -> Result<Message, StoreError> {
        match self.store.append(content, sender) {
            Ok(message) => {
                MessageMetrics::record_appended(self.store.len());
                self.notifier.signal();
                tracing::debug!(message_id = %message.id, sender = %message.sender, "Message stored");
                Ok(message)
            }
            Err(e) => {
                MessageMetrics::record_rejected();
                Err(e)
            }
        }
    }

    /// Messages strictly after `since`, or the whole log when `since` is absent
    pub fn get_messages(&self, since: Option<DateTime<Utc>>) -> Vec<Message> {
        self.store.after(since.unwrap_or_else(beginning_of_time))
    }

    /// Register for change signals; drop the returned subscription to unsubscribe
    pub fn subscribe_to_changes(&self) -> Subscription<'_> {
        self.notifier.subscribe()
    }

    /// Start a catch-up session positioned at `since`
    pub fn catch_up(&self, since: Option<DateTime<Utc>>, heartbeat_interval: Duration) -> CatchUp {
        CatchUp::new(
            self.store.clone(),
            self.notifier.clone(),
            since,
            heartbeat_interval,
        )
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }
}
