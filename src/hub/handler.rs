use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::chat::ChatService;
use crate::connection_manager::ConnectionHandle;
use crate::metrics::ConnectionMetrics;
use crate::server::AppState;
use crate::store::Message as ChatMessage;

use super::protocol::{methods, ClientFrame, HubFrame};
use super::TRANSPORT;

/// How long a cancelled session waits for its close frame to be written
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type Handle = Arc<ConnectionHandle<HubFrame>>;

/// Server side of the hub: answers invocations from one connection.
///
/// New messages reach hub clients through the broadcaster, not through the
/// session that sent them.
#[derive(Clone)]
pub struct MessagesHub {
    chat: ChatService,
    recent_history: chrono::Duration,
}

impl MessagesHub {
    pub fn new(chat: ChatService, recent_history: chrono::Duration) -> Self {
        Self {
            chat,
            recent_history,
        }
    }

    /// Greet a new connection and send it the recent history
    pub async fn on_connected(&self, handle: &Handle) -> Result<(), mpsc::error::SendError<HubFrame>> {
        handle.send(HubFrame::connected(&handle.id.to_string())).await?;
        handle
            .send(HubFrame::messages_history(&self.recent_messages()))
            .await
    }

    /// Run one server method. `Err` carries the message reported to the caller.
    #[tracing::instrument(
        name = "hub.invoke",
        skip(self, target, arguments, handle),
        fields(connection_id = %handle.id, method = %target)
    )]
    pub async fn invoke(&self, target: &str, arguments: &[Value], handle: &Handle) -> Result<(), String> {
        match target {
            methods::SEND_MESSAGE => {
                let content = string_argument(arguments, 0)
                    .ok_or_else(|| "SendMessage expects a content string".to_string())?;
                let sender = string_argument(arguments, 1);

                self.chat
                    .send_message(content, sender)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            methods::GET_MESSAGES => {
                let since = arguments
                    .first()
                    .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
                    .ok_or_else(|| "GetMessages expects an RFC 3339 timestamp".to_string())?;

                let messages = self.chat.get_messages(Some(since));
                self.send_history(handle, &messages).await
            }
            methods::GET_RECENT_MESSAGES => {
                let messages = self.recent_messages();
                self.send_history(handle, &messages).await
            }
            other => Err(format!("Unknown hub method '{}'", other)),
        }
    }

    /// Messages inside the history window; a window reaching past the
    /// representable range means everything
    fn recent_messages(&self) -> Vec<ChatMessage> {
        let since = Utc::now().checked_sub_signed(self.recent_history);
        self.chat.get_messages(since)
    }

    async fn send_history(&self, handle: &Handle, messages: &[ChatMessage]) -> Result<(), String> {
        handle
            .send(HubFrame::messages_history(messages))
            .await
            .map_err(|_| "Connection closed".to_string())
    }
}

fn string_argument(arguments: &[Value], index: usize) -> Option<&str> {
    arguments.get(index).and_then(Value::as_str)
}

/// Hub upgrade handler
#[tracing::instrument(name = "hub.upgrade", skip(ws, state))]
pub async fn hub_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established hub connection
#[tracing::instrument(name = "hub.connection", skip(socket, state), fields(otel.kind = "server"))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<HubFrame>(state.settings.websocket.channel_buffer);
    let cancel = state.shutdown.child_token();
    let handle = state.hub_connections.register(tx, cancel.clone());
    let connection_id = handle.id;
    let hub = MessagesHub::new(state.chat.clone(), state.settings.hub.recent_history());

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for writing queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize hub frame");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }

            if frame.is_close() {
                let _ = ws_sender
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "".into(),
                    })))
                    .await;
                break;
            }
        }
    });

    if hub.on_connected(&handle).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Connection closed before greeting");
    }

    // Task for receiving client frames
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &hub, &recv_handle).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Hub receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = cancel.cancelled() => {
            let _ = tokio::time::timeout(CLOSE_GRACE, &mut send_task).await;
        }
    }

    cancel.cancel();
    recv_task.abort();
    send_task.abort();

    state.hub_connections.unregister(connection_id);
    tracing::info!(connection_id = %connection_id, "Hub connection closed");
}

/// Process a received frame.
/// Returns false if the connection should be closed
async fn process_message(msg: Message, hub: &MessagesHub, handle: &Handle) -> bool {
    let text = match msg {
        Message::Text(text) => text,
        Message::Ping(_) | Message::Pong(_) => {
            handle.update_activity();
            return true;
        }
        Message::Binary(_) => {
            let _ = handle
                .send(HubFrame::error("Binary messages are not supported"))
                .await;
            return true;
        }
        Message::Close(_) => return false,
    };

    handle.update_activity();

    let frame: ClientFrame = match serde_json::from_str(&text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse hub frame");
            let _ = handle.send(HubFrame::error(format!("Invalid frame: {}", e))).await;
            return true;
        }
    };

    match frame {
        ClientFrame::Invocation {
            invocation_id,
            target,
            arguments,
        } => {
            ConnectionMetrics::record_frame(TRANSPORT, "invocation");
            let outcome = hub.invoke(&target, &arguments, handle).await;

            if let Err(ref message) = outcome {
                tracing::debug!(method = %target, error = %message, "Invocation failed");
                let _ = handle.send(HubFrame::error(message.clone())).await;
            }
            if let Some(id) = invocation_id {
                let _ = handle.send(HubFrame::completion(id, outcome.err())).await;
            }
            true
        }
        ClientFrame::Ping => {
            ConnectionMetrics::record_frame(TRANSPORT, "ping");
            true
        }
        ClientFrame::Close => {
            ConnectionMetrics::record_frame(TRANSPORT, "close");
            false
        }
    }
}
