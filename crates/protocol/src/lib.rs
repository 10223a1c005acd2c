//! Chat relay protocol
//!
//! Wire types shared by the relay server and its tests: the JSON frames a
//! browser exchanges over the chat WebSocket, and the Genesys Cloud Open
//! Messaging envelopes received on the webhook or posted upstream.

use uuid::Uuid;

pub mod chat;
pub mod codec;
pub mod open_message;

pub use chat::{ChatMessage, ChatMessageError, CreateChatRequest, CreateChatResponse};
pub use codec::CodecError;
pub use open_message::*;

/// Path prefix under which chat WebSockets are served.
pub const CHAT_WS_PREFIX: &str = "/chat/ws/";

/// Generate a new session id
pub fn new_session_id() -> Uuid {
    Uuid::new_v4()
}

/// WebSocket path a browser should upgrade on for the given session.
pub fn chat_ws_path(session_id: Uuid) -> String {
    format!("{CHAT_WS_PREFIX}{session_id}")
}
