//! Provider webhook: signature check, decode, and delivery to the browser.
//!
//! The signature is checked over the raw body before anything is parsed. For
//! text messages the raw body, unchanged, is what the browser receives.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use chatrelay_protocol::codec::decode_webhook;
use chatrelay_protocol::WebhookEvent;

use crate::error::ApiError;
use crate::signer::{SignatureError, SIGNATURE_HEADER};
use crate::state::AppState;

/// HTTP POST handler for `/hook`.
pub async fn hook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .map(|value| value.to_str().unwrap_or_default());

    if let Err(e) = state.signer.verify(&body, signature) {
        match &e {
            SignatureError::Mismatch { expected, received } => warn!(
                component = "hook",
                event = "hook.signature.mismatch",
                expected = %expected,
                received = %received,
                "Webhook signature does not match"
            ),
            other => warn!(
                component = "hook",
                event = "hook.signature.rejected",
                error = %other,
                "Webhook signature rejected"
            ),
        }
        return Err(e.into());
    }

    let event = decode_webhook(&body).inspect_err(|e| {
        warn!(
            component = "hook",
            event = "hook.decode.failed",
            error = %e,
            payload_bytes = body.len(),
            "Failed to decode webhook body"
        );
    })?;

    let kind = event.kind().to_string();
    match event {
        WebhookEvent::Text(text) => {
            let recipient = text.recipient().unwrap_or_default();
            let session = state.registry.find_by_user(recipient).await.ok_or_else(|| {
                warn!(
                    component = "hook",
                    event = "hook.text.no_session",
                    user_id = %recipient,
                    "No live chat for webhook recipient"
                );
                ApiError::NotFound(format!("no chat for user {recipient}"))
            })?;

            let frame = String::from_utf8_lossy(&body).into_owned();
            session.enqueue(frame).await.map_err(|e| {
                warn!(
                    component = "hook",
                    event = "hook.text.session_closed",
                    session_id = %session.id(),
                    error = %e,
                    "Chat closed before the message was queued"
                );
                ApiError::NotFound(format!("chat for user {recipient} is closed"))
            })?;

            info!(
                component = "hook",
                event = "hook.text.forwarded",
                session_id = %session.id(),
                user_id = %recipient,
                message_id = text.id.as_deref().unwrap_or_default(),
                "Forwarded webhook text to chat"
            );
        }
        WebhookEvent::Receipt(receipt) => {
            debug!(
                component = "hook",
                event = "hook.receipt",
                message_id = receipt.id.as_deref().unwrap_or_default(),
                status = receipt.status.as_deref().unwrap_or_default(),
                "Webhook receipt acknowledged"
            );
        }
        WebhookEvent::Event(_) | WebhookEvent::Structured(_) => {
            debug!(
                component = "hook",
                event = "hook.event",
                kind = %kind,
                "Webhook event acknowledged"
            );
        }
        WebhookEvent::Unknown(_) => {
            warn!(
                component = "hook",
                event = "hook.unknown_type",
                kind = %kind,
                "Unknown webhook message type, acknowledging"
            );
        }
    }

    Ok(Json(json!({})))
}
