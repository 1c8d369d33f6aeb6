use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::chat::ChatService;
use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::hub::{self, HubFrame};
use crate::websocket::{self, OutboundMessage};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub chat: ChatService,
    pub ws_connections: Arc<ConnectionRegistry<OutboundMessage>>,
    pub hub_connections: Arc<ConnectionRegistry<HubFrame>>,
    /// Root token; every session waits on it or on a child of it
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self::with_chat(settings, ChatService::new())
    }

    pub fn with_chat(settings: Settings, chat: ChatService) -> Self {
        Self {
            settings: Arc::new(settings),
            chat,
            ws_connections: Arc::new(ConnectionRegistry::new(websocket::TRANSPORT)),
            hub_connections: Arc::new(ConnectionRegistry::new(hub::TRANSPORT)),
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }
}
