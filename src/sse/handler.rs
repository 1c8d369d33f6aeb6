//! SSE handler implementation.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::api::SinceQuery;
use crate::catchup::CatchUpEvent;
use crate::chat::ChatService;
use crate::metrics::SseMetrics;
use crate::server::AppState;
use crate::store::Message;

/// SSE stream handler
#[tracing::instrument(name = "sse.connect", skip(state, query), fields(since = ?query.since))]
pub async fn sse_handler(State(state): State<AppState>, Query(query): Query<SinceQuery>) -> Response {
    let stream = create_sse_stream(
        state.chat.clone(),
        query.since,
        state.settings.stream.heartbeat(),
        state.shutdown.child_token(),
    );

    Sse::new(stream).into_response()
}

/// Create the SSE event stream.
///
/// Dropping the stream (client went away) ends the session; cancelling
/// `cancel` ends it with a `disconnected` event.
pub fn create_sse_stream(
    chat: ChatService,
    since: Option<DateTime<Utc>>,
    heartbeat: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    // Dropped together with the stream
    let guard = StreamGuard::new();
    let mut catch_up = chat.catch_up(since, heartbeat);

    async_stream::stream! {
        let _guard = guard;

        for message in catch_up.take_pending() {
            match message_event(&message) {
                Ok(event) => yield Ok(event),
                Err(event) => {
                    yield Ok(event);
                    return;
                }
            }
        }

        yield Ok(lifecycle_event("connected", "SSE connection established"));

        'session: loop {
            match catch_up.next(&cancel).await {
                CatchUpEvent::Messages(batch) => {
                    for message in batch {
                        match message_event(&message) {
                            Ok(event) => yield Ok(event),
                            Err(event) => {
                                yield Ok(event);
                                break 'session;
                            }
                        }
                    }
                }
                CatchUpEvent::Heartbeat => {
                    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
                    yield Ok(lifecycle_event("heartbeat", &now));
                }
                CatchUpEvent::Closed => break,
            }
        }

        yield Ok(lifecycle_event("disconnected", "SSE connection closed"));
    }
}

/// `message` event, or the `error` event that ends the stream
fn message_event(message: &Message) -> Result<Event, Event> {
    match Event::default().event("message").json_data(message) {
        Ok(event) => {
            SseMetrics::record_event("message");
            Ok(event)
        }
        Err(e) => {
            tracing::error!(message_id = %message.id, error = %e, "Failed to serialize SSE message");
            Err(lifecycle_event("error", &e.to_string()))
        }
    }
}

fn lifecycle_event(kind: &'static str, data: &str) -> Event {
    SseMetrics::record_event(kind);
    Event::default().event(kind).data(data)
}

/// Tracks the stream's lifetime for metrics and logs
struct StreamGuard {
    started: Instant,
}

impl StreamGuard {
    fn new() -> Self {
        SseMetrics::stream_opened();
        tracing::info!("SSE stream opened");
        Self {
            started: Instant::now(),
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        SseMetrics::stream_closed();
        tracing::info!(
            duration_secs = self.started.elapsed().as_secs_f64(),
            "SSE stream closed"
        );
    }
}
