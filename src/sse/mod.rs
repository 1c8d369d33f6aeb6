//! Server-Sent Events stream of chat messages.
//!
//! # Endpoint
//!
//! `GET /api/server-sent-event/messages/stream?since=<RFC 3339>`
//!
//! # Event Types
//!
//! - `message` - Stored message as JSON; the backlog after `since` comes first
//! - `connected` - Sent once the backlog has been written
//! - `heartbeat` - Current server time, after each idle interval
//! - `error` - A message could not be encoded; the stream ends
//! - `disconnected` - The server is shutting down

mod handler;

pub use handler::{create_sse_stream, sse_handler};
