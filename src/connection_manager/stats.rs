//! Connection statistics

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of one transport's registry
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub transport: &'static str,
    pub total_connections: usize,
    pub oldest_connected_at: Option<DateTime<Utc>>,
}
