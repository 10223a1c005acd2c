//! Chat relay server
//!
//! Bridges browser chat sessions over WebSocket to Genesys Cloud Open
//! Messaging: browser messages are posted upstream, provider messages arrive
//! on a signed webhook and are pushed to the right browser.

pub mod config;
pub mod error;
pub mod genesys;
pub mod hook_handler;
pub mod integration;
pub mod logging;
pub mod oauth;
pub mod registry;
pub mod registry_command;
pub mod session;
pub mod signer;
pub mod state;
pub mod upstream;
pub mod websocket;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::hook_handler::hook_handler;
use crate::state::AppState;
use crate::websocket::{chat_ws_handler, create_chat_handler, health_handler};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(create_chat_handler))
        .route("/chat/ws/{id}", get(chat_ws_handler))
        .route("/hook", post(hook_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(
            component = "server",
            event = "server.listening",
            bind_address = %addr,
            "Listening"
        );
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
