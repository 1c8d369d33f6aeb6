//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection_manager::ConnectionStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub messages: MessageStats,
    pub notifier: NotifierStats,
    pub connections: PushConnectionStats,
}

#[derive(Debug, Serialize)]
pub struct MessageStats {
    pub stored: usize,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct NotifierStats {
    /// Sessions currently waiting for a change
    pub waiters: usize,
}

#[derive(Debug, Serialize)]
pub struct PushConnectionStats {
    pub websocket: ConnectionStats,
    pub hub: ConnectionStats,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_cancelled() {
        "shutting_down"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let store = state.chat.store();

    Json(StatsResponse {
        messages: MessageStats {
            stored: store.len(),
            latest_timestamp: store.latest_timestamp(),
        },
        notifier: NotifierStats {
            waiters: state.chat.notifier().waiter_count(),
        },
        connections: PushConnectionStats {
            websocket: state.ws_connections.stats(),
            hub: state.hub_connections.stats(),
        },
    })
}
