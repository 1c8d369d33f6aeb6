//! Prometheus metrics for the chat fan-out service.
//!
//! - Message metrics (appended, rejected)
//! - Change notifier metrics (live waiters, wait outcomes)
//! - Per-transport session metrics (long-poll, SSE, WebSocket, hub)
//! - Broadcast and heartbeat metrics for the push registries

mod helpers;

pub use helpers::{
    encode_metrics, BroadcastMetrics, ConnectionMetrics, HeartbeatMetrics, LongPollMetrics,
    MessageMetrics, NotifierMetrics, SseMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "chat";

lazy_static! {
    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Messages successfully appended to the store
    pub static ref MESSAGES_APPENDED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_appended_total", METRIC_PREFIX),
        "Total messages appended to the store"
    ).unwrap();

    /// Send attempts rejected because of blank content
    pub static ref MESSAGES_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_rejected_total", METRIC_PREFIX),
        "Total send attempts rejected by validation"
    ).unwrap();

    /// Messages currently held by the store
    pub static ref MESSAGES_STORED: IntGauge = register_int_gauge!(
        format!("{}_messages_stored", METRIC_PREFIX),
        "Number of messages currently in the store"
    ).unwrap();

    // ============================================================================
    // Change Notifier Metrics
    // ============================================================================

    /// Live notifier subscriptions
    pub static ref NOTIFIER_WAITERS: IntGauge = register_int_gauge!(
        format!("{}_notifier_waiters", METRIC_PREFIX),
        "Number of sessions currently registered with the change notifier"
    ).unwrap();

    /// Wait outcomes (signaled, timed_out, cancelled)
    pub static ref NOTIFIER_WAIT_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifier_wait_outcomes_total", METRIC_PREFIX),
        "Total change notifier waits by outcome",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Transport Metrics
    // ============================================================================

    /// Long-poll responses by result (messages, empty)
    pub static ref LONG_POLL_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_long_poll_responses_total", METRIC_PREFIX),
        "Total long-poll responses by result",
        &["result"]
    ).unwrap();

    /// Long-poll hold time
    pub static ref LONG_POLL_WAIT_SECONDS: Histogram = register_histogram!(
        format!("{}_long_poll_wait_seconds", METRIC_PREFIX),
        "Time a long-poll request was held open in seconds",
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 20.0, 30.0, 60.0]
    ).unwrap();

    /// Open SSE streams
    pub static ref SSE_STREAMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_sse_streams_active", METRIC_PREFIX),
        "Number of open server-sent event streams"
    ).unwrap();

    /// SSE events written by event type
    pub static ref SSE_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_sse_events_total", METRIC_PREFIX),
        "Total server-sent events by event type",
        &["event"]
    ).unwrap();

    /// Open push connections by transport (websocket, hub)
    pub static ref CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of open push connections",
        &["transport"]
    ).unwrap();

    /// Push connections opened by transport
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total push connections opened",
        &["transport"]
    ).unwrap();

    /// Push connections closed by transport
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total push connections closed",
        &["transport"]
    ).unwrap();

    /// Push connection duration by transport
    pub static ref CONNECTION_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Push connection duration in seconds",
        &["transport"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    /// Frames received from clients by transport and kind
    pub static ref FRAMES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total frames received from push clients",
        &["transport", "kind"]
    ).unwrap();

    // ============================================================================
    // Broadcast & Heartbeat Metrics
    // ============================================================================

    /// Frames delivered by registry broadcasts
    pub static ref BROADCAST_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_delivered_total", METRIC_PREFIX),
        "Total frames delivered by registry broadcasts"
    ).unwrap();

    /// Frames that could not be delivered by registry broadcasts
    pub static ref BROADCAST_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_broadcast_failed_total", METRIC_PREFIX),
        "Total registry broadcast delivery failures"
    ).unwrap();

    /// Heartbeat round duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    ).unwrap();

    /// Heartbeat send timeouts
    pub static ref HEARTBEAT_TIMEOUTS: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Total heartbeat send timeouts"
    ).unwrap();

    /// Connections evicted for inactivity
    pub static ref STALE_CONNECTIONS_REMOVED: IntCounter = register_int_counter!(
        format!("{}_stale_connections_removed_total", METRIC_PREFIX),
        "Total connections removed after exceeding the inactivity timeout"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // lazy_static registers on first access
        MESSAGES_APPENDED_TOTAL.inc();

        let output = encode_metrics().unwrap();
        assert!(output.contains("chat_messages_appended_total"));
    }

    #[test]
    fn test_transport_metrics() {
        ConnectionMetrics::opened("websocket");
        ConnectionMetrics::closed("websocket", 1.5);
        LongPollMetrics::record("empty", 30.0);
        SseMetrics::record_event("heartbeat");
        // Just verify no panics
    }
}
