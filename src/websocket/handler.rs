use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::catchup::CatchUpEvent;
use crate::chat::ChatService;
use crate::connection_manager::ConnectionHandle;
use crate::metrics::ConnectionMetrics;
use crate::server::AppState;
use crate::store::SendMessageRequest;

use super::message::{OutboundMessage, ServerMessage};
use super::TRANSPORT;

/// How long a cancelled session waits for its close frame to be written
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type Handle = Arc<ConnectionHandle<OutboundMessage>>;

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state), fields(otel.kind = "server"))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer);
    let cancel = state.shutdown.child_token();
    let handle = state.ws_connections.register(tx, cancel.clone());
    let connection_id = handle.id;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for writing queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg {
                OutboundMessage::Frame(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize message");
                        continue;
                    }
                },
                OutboundMessage::Ping => Message::Ping(Bytes::new()),
                OutboundMessage::Close { reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };

            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving client frames
    let chat = state.chat.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &chat, &recv_handle).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Task for pushing the backlog and then live messages
    let push_task = tokio::spawn(push_messages(
        state.chat.clone(),
        handle.clone(),
        state.settings.websocket.heartbeat(),
    ));

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = cancel.cancelled() => {
            // Shutdown and eviction queue a close frame before cancelling
            let _ = tokio::time::timeout(CLOSE_GRACE, &mut send_task).await;
        }
    }

    cancel.cancel();
    push_task.abort();
    recv_task.abort();
    send_task.abort();

    state.ws_connections.unregister(connection_id);
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Send `connected`, then every stored message, then each new one as it arrives
async fn push_messages(chat: ChatService, handle: Handle, heartbeat: Duration) {
    if handle.send(ServerMessage::connected().into()).await.is_err() {
        return;
    }

    let cancel = handle.cancellation().clone();
    let mut catch_up = chat.catch_up(None, heartbeat);
    let mut sent = 0usize;

    loop {
        match catch_up.next(&cancel).await {
            CatchUpEvent::Messages(batch) => {
                for message in batch {
                    if handle.send(ServerMessage::message(message).into()).await.is_err() {
                        return;
                    }
                    sent += 1;
                }
            }
            // Keep-alive pings come from the heartbeat task
            CatchUpEvent::Heartbeat => continue,
            CatchUpEvent::Closed => break,
        }
    }

    tracing::debug!(connection_id = %handle.id, sent, "Push loop finished");
}

/// Process a received WebSocket frame.
/// Returns false if the connection should be closed
async fn process_message(msg: Message, chat: &ChatService, handle: &Handle) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();
            ConnectionMetrics::record_frame(TRANSPORT, "text");

            let request: SendMessageRequest = match serde_json::from_str(&text) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()).into())
                        .await;
                    return true;
                }
            };

            if let Err(e) = chat.send_message(&request.content, request.sender.as_deref()) {
                let _ = handle
                    .send(ServerMessage::error("VALIDATION_ERROR", e.to_string()).into())
                    .await;
            }
            true
        }
        Message::Binary(_) => {
            ConnectionMetrics::record_frame(TRANSPORT, "binary");
            let _ = handle
                .send(
                    ServerMessage::error("UNSUPPORTED_FORMAT", "Binary messages are not supported")
                        .into(),
                )
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself; only liveness matters here
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn handle() -> (Handle, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(ConnectionHandle::new(tx, CancellationToken::new())),
            rx,
        )
    }

    #[tokio::test]
    async fn test_text_frame_sends_message() {
        let chat = ChatService::new();
        let (handle, _rx) = handle();

        let keep_open = process_message(
            Message::Text(r#"{"content":"hi","sender":"amy"}"#.into()),
            &chat,
            &handle,
        )
        .await;

        assert!(keep_open);
        let stored = chat.get_messages(None);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hi");
        assert_eq!(stored[0].sender, "amy");
    }

    #[tokio::test]
    async fn test_blank_content_returns_error_frame() {
        let chat = ChatService::new();
        let (handle, mut rx) = handle();

        assert!(process_message(Message::Text(r#"{"content":"  "}"#.into()), &chat, &handle).await);

        match rx.recv().await {
            Some(OutboundMessage::Frame(ServerMessage::Error { code, .. })) => {
                assert_eq!(code, "VALIDATION_ERROR")
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(chat.get_messages(None).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_keeps_connection() {
        let chat = ChatService::new();
        let (handle, mut rx) = handle();

        assert!(process_message(Message::Text("not json".into()), &chat, &handle).await);
        assert!(matches!(
            rx.recv().await,
            Some(OutboundMessage::Frame(ServerMessage::Error { .. }))
        ));
    }

    #[tokio::test]
    async fn test_close_frame_ends_session() {
        let chat = ChatService::new();
        let (handle, _rx) = handle();

        assert!(!process_message(Message::Close(None), &chat, &handle).await);
    }

    #[tokio::test]
    async fn test_push_sends_connected_then_backlog_then_live() {
        let chat = ChatService::new();
        chat.send_message("first", None).unwrap();
        let (handle, mut rx) = handle();

        let task = tokio::spawn(push_messages(
            chat.clone(),
            handle.clone(),
            Duration::from_secs(30),
        ));

        assert!(matches!(
            rx.recv().await,
            Some(OutboundMessage::Frame(ServerMessage::Connected { .. }))
        ));
        match rx.recv().await {
            Some(OutboundMessage::Frame(ServerMessage::Message { data })) => {
                assert_eq!(data.content, "first")
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        chat.send_message("second", None).unwrap();
        match rx.recv().await {
            Some(OutboundMessage::Frame(ServerMessage::Message { data })) => {
                assert_eq!(data.content, "second")
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        handle.close();
        task.await.unwrap();
    }
}
