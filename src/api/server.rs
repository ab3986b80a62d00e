//! HTTP server setup: router and shared handler state.

use super::webhook;
use crate::assistant::AssistantClient;
use crate::contacts::ContactStore;
use crate::media::MediaInterpreter;
use crate::relay::Debouncer;

use axum::Router;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Serialize;

use std::net::SocketAddr;
use std::sync::Arc;

/// Everything the webhook needs to admit a message into the relay.
pub struct ApiState {
    pub contacts: Arc<dyn ContactStore>,
    /// Used to open a thread for first-time contacts.
    pub assistant: Arc<dyn AssistantClient>,
    pub media: Arc<dyn MediaInterpreter>,
    pub debouncer: Debouncer,
    /// How long an operator's manual reply silences the bot.
    pub cooldown: chrono::Duration,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook::receive))
        .with_state(state)
}

/// Start the HTTP server on the given address. It stops accepting
/// connections once `shutdown_rx` turns true.
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    let local = listener.local_addr()?;
    tracing::info!(bind = %local, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
