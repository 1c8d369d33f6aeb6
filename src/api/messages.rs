//! Polling, long-polling and send endpoints.

use std::time::Instant;

use axum::{
    extract::{Query, State},
    Json,
};

use crate::catchup::CatchUpEvent;
use crate::error::Result;
use crate::metrics::LongPollMetrics;
use crate::server::AppState;
use crate::store::{Message, SendMessageRequest};

use super::SinceQuery;

/// GET /api/polling/messages?since=
pub async fn poll_messages(
    State(state): State<AppState>,
    Query(query): Query<SinceQuery>,
) -> Json<Vec<Message>> {
    Json(state.chat.get_messages(query.since))
}

/// GET /api/long-polling/messages
pub async fn all_messages(State(state): State<AppState>) -> Json<Vec<Message>> {
    Json(state.chat.get_messages(None))
}

/// GET /api/long-polling/messages/receive?since=
///
/// Answers as soon as anything newer than `since` exists, or with `[]` once
/// the long-poll timeout passes or the server starts shutting down.
#[tracing::instrument(name = "long_poll.receive", skip(state, query), fields(since = ?query.since))]
pub async fn long_poll_messages(
    State(state): State<AppState>,
    Query(query): Query<SinceQuery>,
) -> Json<Vec<Message>> {
    let started = Instant::now();
    let mut catch_up = state
        .chat
        .catch_up(query.since, state.settings.stream.long_poll());

    let messages = match catch_up.next(&state.shutdown).await {
        CatchUpEvent::Messages(messages) => messages,
        CatchUpEvent::Heartbeat | CatchUpEvent::Closed => Vec::new(),
    };

    let result = if messages.is_empty() { "empty" } else { "messages" };
    LongPollMetrics::record(result, started.elapsed().as_secs_f64());
    tracing::debug!(result, count = messages.len(), "Long poll answered");

    Json(messages)
}

/// POST .../messages/send
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Message>> {
    let message = state
        .chat
        .send_message(&request.content, request.sender.as_deref())?;
    Ok(Json(message))
}
