use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use chat_fanout_service::config::Settings;
use chat_fanout_service::error::AppError;
use chat_fanout_service::hub::HubBroadcaster;
use chat_fanout_service::server::{create_app, AppState};
use chat_fanout_service::shutdown::GracefulShutdown;
use chat_fanout_service::tasks::HeartbeatTask;
use chat_fanout_service::telemetry::init_telemetry;

const SHUTDOWN_REASON: &str = "Server shutting down";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().map_err(AppError::from)?;

    // Initialize tracing; keep the guard until exit
    let _telemetry = init_telemetry(&settings.otel, &settings.log)?;
    tracing::info!("Configuration loaded");

    // Create application state
    let state = AppState::new(settings.clone());
    tracing::info!("Application state initialized");

    // Fan new messages out to hub connections
    let broadcaster = HubBroadcaster::new(
        state.chat.clone(),
        state.hub_connections.clone(),
        settings.stream.heartbeat(),
        state.shutdown.clone(),
    );
    let broadcaster_handle = tokio::spawn(broadcaster.run());

    // Start heartbeat task in background
    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        state.ws_connections.clone(),
        state.hub_connections.clone(),
        state.shutdown.clone(),
    );
    let heartbeat_handle = tokio::spawn(heartbeat_task.run());

    // Create Axum app
    let app = create_app(state.clone());

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Runs before axum drains in-flight requests
    let shutdown = GracefulShutdown::new(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.execute(SHUTDOWN_REASON).await;
        })
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(broadcaster_handle, heartbeat_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
