use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;
use crate::sse::sse_handler;

use super::health::{health, stats};
use super::messages::{all_messages, long_poll_messages, poll_messages, send_message};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health, stats & metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api",
            Router::new()
                // Polling
                .route("/polling/messages", get(poll_messages))
                .route("/polling/messages/send", post(send_message))
                // Long polling
                .route("/long-polling/messages", get(all_messages))
                .route("/long-polling/messages/receive", get(long_poll_messages))
                .route("/long-polling/messages/send", post(send_message))
                // Server-sent events
                .route("/server-sent-event/messages/stream", get(sse_handler))
                .route("/server-sent-event/messages/send", post(send_message)),
        )
}
