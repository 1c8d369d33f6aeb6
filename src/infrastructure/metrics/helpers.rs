//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCAST_DELIVERED_TOTAL, BROADCAST_FAILED_TOTAL, CONNECTIONS_ACTIVE,
    CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL, CONNECTION_DURATION,
    FRAMES_RECEIVED_TOTAL, HEARTBEAT_DURATION_MS, HEARTBEAT_TIMEOUTS, LONG_POLL_RESPONSES_TOTAL,
    LONG_POLL_WAIT_SECONDS, MESSAGES_APPENDED_TOTAL, MESSAGES_REJECTED_TOTAL, MESSAGES_STORED, NOTIFIER_WAITERS,
    NOTIFIER_WAIT_OUTCOMES_TOTAL, SSE_EVENTS_TOTAL, SSE_STREAMS_ACTIVE, STALE_CONNECTIONS_REMOVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record an append and the resulting store size
    pub fn record_appended(stored: usize) {
        MESSAGES_APPENDED_TOTAL.inc();
        MESSAGES_STORED.set(stored as i64);
    }

    pub fn record_rejected() {
        MESSAGES_REJECTED_TOTAL.inc();
    }
}

/// Helper struct for change notifier metrics
pub struct NotifierMetrics;

impl NotifierMetrics {
    pub fn subscribed() {
        NOTIFIER_WAITERS.inc();
    }

    pub fn unsubscribed() {
        NOTIFIER_WAITERS.dec();
    }

    pub fn record_outcome(outcome: &str) {
        NOTIFIER_WAIT_OUTCOMES_TOTAL
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Helper struct for long-poll metrics
pub struct LongPollMetrics;

impl LongPollMetrics {
    /// Record a long-poll response (`messages` or `empty`) and how long it was held
    pub fn record(result: &str, waited_secs: f64) {
        LONG_POLL_RESPONSES_TOTAL.with_label_values(&[result]).inc();
        LONG_POLL_WAIT_SECONDS.observe(waited_secs);
    }
}

/// Helper struct for server-sent event metrics
pub struct SseMetrics;

impl SseMetrics {
    pub fn stream_opened() {
        SSE_STREAMS_ACTIVE.inc();
    }

    pub fn stream_closed() {
        SSE_STREAMS_ACTIVE.dec();
    }

    pub fn record_event(event: &str) {
        SSE_EVENTS_TOTAL.with_label_values(&[event]).inc();
    }
}

/// Helper struct for push connection metrics, labelled by transport
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn opened(transport: &str) {
        CONNECTIONS_OPENED_TOTAL.with_label_values(&[transport]).inc();
        CONNECTIONS_ACTIVE.with_label_values(&[transport]).inc();
    }

    pub fn closed(transport: &str, duration_secs: f64) {
        CONNECTIONS_CLOSED_TOTAL.with_label_values(&[transport]).inc();
        CONNECTIONS_ACTIVE.with_label_values(&[transport]).dec();
        CONNECTION_DURATION
            .with_label_values(&[transport])
            .observe(duration_secs);
    }

    pub fn record_frame(transport: &str, kind: &str) {
        FRAMES_RECEIVED_TOTAL
            .with_label_values(&[transport, kind])
            .inc();
    }
}

/// Helper struct for registry broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record_delivered(count: u64) {
        BROADCAST_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        BROADCAST_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    /// Record heartbeat round duration
    pub fn record_duration_ms(duration_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }

    /// Record heartbeat timeouts
    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS.inc_by(count);
    }

    pub fn record_stale_removed(count: u64) {
        STALE_CONNECTIONS_REMOVED.inc_by(count);
    }
}
