//! Change notification for sessions waiting on new messages.
//!
//! A [`ChangeNotifier`] carries no data. Waking up only means "look at the
//! store again"; callers re-query [`MessageStore`](crate::store::MessageStore)
//! after every [`WaitOutcome::Signaled`].
//!
//! Registration happens in [`ChangeNotifier::subscribe`], before the caller
//! checks the store, so a signal issued between the check and the wait is
//! never lost. Dropping a [`Subscription`] removes the registration.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::metrics::NotifierMetrics;

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// `signal()` was called while the subscription was registered
    Signaled,
    /// The timeout elapsed first
    TimedOut,
    /// The cancellation token fired first
    Cancelled,
}

impl WaitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitOutcome::Signaled => "signaled",
            WaitOutcome::TimedOut => "timed_out",
            WaitOutcome::Cancelled => "cancelled",
        }
    }
}

/// Broadcast wake-up primitive shared by every waiting session
#[derive(Default)]
pub struct ChangeNotifier {
    notify: Notify,
    waiters: AtomicUsize,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. Signals issued from now on are observed by it.
    pub fn subscribe(&self) -> Subscription<'_> {
        let mut notified = Box::pin(self.notify.notified());
        notified.as_mut().enable();

        self.waiters.fetch_add(1, Ordering::Relaxed);
        NotifierMetrics::subscribed();

        Subscription {
            notified,
            waiters: &self.waiters,
        }
    }

    /// Wake every registered waiter once. A no-op when nobody is waiting.
    pub fn signal(&self) {
        self.notify.notify_waiters();
    }

    /// Subscribe and wait in one step
    pub async fn wait(&self, timeout: Duration, cancel: &CancellationToken) -> WaitOutcome {
        self.subscribe().wait(timeout, cancel).await
    }

    /// Number of live subscriptions
    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}

/// A registration against a [`ChangeNotifier`].
///
/// Consumed by [`Subscription::wait`]; dropping it without waiting is the
/// explicit unsubscribe.
pub struct Subscription<'a> {
    notified: Pin<Box<Notified<'a>>>,
    waiters: &'a AtomicUsize,
}

impl Subscription<'_> {
    /// Block until signaled, timed out or cancelled, whichever is seen first.
    ///
    /// A zero timeout never suspends.
    pub async fn wait(mut self, timeout: Duration, cancel: &CancellationToken) -> WaitOutcome {
        let outcome = if cancel.is_cancelled() {
            WaitOutcome::Cancelled
        } else if timeout.is_zero() {
            if self.is_signaled() {
                WaitOutcome::Signaled
            } else {
                WaitOutcome::TimedOut
            }
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => WaitOutcome::Cancelled,
                _ = self.notified.as_mut() => WaitOutcome::Signaled,
                _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            }
        };

        NotifierMetrics::record_outcome(outcome.as_str());
        outcome
    }

    /// Whether a signal has already arrived, without suspending
    pub fn is_signaled(&mut self) -> bool {
        self.notified.as_mut().now_or_never().is_some()
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::Relaxed);
        NotifierMetrics::unsubscribed();
    }
}
