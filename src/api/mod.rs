//! API layer - HTTP endpoint handlers organized by domain.

mod health;
mod messages;
mod metrics;
mod routes;

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use health::{health, stats};
pub use messages::{all_messages, long_poll_messages, poll_messages, send_message};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;

/// `?since=<RFC 3339>`; absent means from the beginning
#[derive(Debug, Default, Deserialize)]
pub struct SinceQuery {
    pub since: Option<DateTime<Utc>>,
}
