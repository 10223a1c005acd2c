//! Browser-facing endpoints: session creation and the chat WebSocket.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use chatrelay_protocol::codec::decode_create_chat;
use chatrelay_protocol::{chat_ws_path, CreateChatResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /chat`: mint a session and tell the browser where to connect.
pub async fn create_chat_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<CreateChatResponse>, ApiError> {
    let request = decode_create_chat(&body).inspect_err(|e| {
        warn!(
            component = "websocket",
            event = "chat.create.invalid",
            error = %e,
            "Invalid create chat request"
        );
    })?;

    let session = state.registry.create_session(request.user_id).await?;
    info!(
        component = "websocket",
        event = "chat.created",
        session_id = %session.id(),
        user_id = %session.user_id(),
        account = %request.account,
        "Chat session created"
    );
    Ok(Json(CreateChatResponse {
        path: chat_ws_path(session.id()),
    }))
}

/// `GET /chat/ws/{id}`: upgrade and attach the connection to its session.
pub async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let session_id = Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("invalid session id: {e}")))?;

    let session = state
        .registry
        .find_by_id(session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("chat {session_id} not found")))?;

    if session.is_attached() {
        return Err(ApiError::Conflict(format!(
            "chat {session_id} already has a connection"
        )));
    }

    let limit = session.config().read_limit;
    let upgrade = ws
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            info!(
                component = "websocket",
                event = "ws.connection.opened",
                session_id = %session.id(),
                "WebSocket connection opened"
            );
            session.attach(socket).await;
        });
    Ok(upgrade.into_response())
}

/// `GET /health`
pub async fn health_handler() -> impl IntoResponse {
    "OK"
}
