//! Decoding of browser frames and provider webhook bodies.

use serde_json::Value;
use thiserror::Error;

use crate::chat::{ChatMessage, ChatMessageError, CreateChatRequest};
use crate::open_message::{OpenMessageHeader, OpenMessageReceipt, OpenMessageText, WebhookEvent};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing message type")]
    MissingType,

    #[error("missing channel.to.id")]
    MissingRecipient,

    #[error("missing userId")]
    MissingUserId,
}

/// Decode a text frame received from the browser.
pub fn decode_chat_message(frame: &[u8]) -> Result<ChatMessage, CodecError> {
    Ok(serde_json::from_slice(frame)?)
}

/// Text frame telling the browser its last frame could not be decoded.
pub fn encode_error_frame(error: impl Into<String>) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&ChatMessageError::new(error))?)
}

/// Decode the body of `POST /chat`.
pub fn decode_create_chat(body: &[u8]) -> Result<CreateChatRequest, CodecError> {
    let request: CreateChatRequest = serde_json::from_slice(body)?;
    if request.user_id.is_empty() {
        return Err(CodecError::MissingUserId);
    }
    Ok(request)
}

/// Decode a webhook body posted by the provider.
///
/// The `type` discriminator is matched case-insensitively. Unknown types are
/// not an error so the caller can still acknowledge them.
pub fn decode_webhook(body: &[u8]) -> Result<WebhookEvent, CodecError> {
    let value: Value = serde_json::from_slice(body)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?
        .to_string();

    let event = match kind.to_ascii_lowercase().as_str() {
        "text" => {
            let text: OpenMessageText = serde_json::from_value(value)?;
            if text.recipient().is_none() {
                return Err(CodecError::MissingRecipient);
            }
            WebhookEvent::Text(text)
        }
        "receipt" => WebhookEvent::Receipt(serde_json::from_value::<OpenMessageReceipt>(value)?),
        "event" => WebhookEvent::Event(serde_json::from_value::<OpenMessageHeader>(value)?),
        "structured" => {
            WebhookEvent::Structured(serde_json::from_value::<OpenMessageHeader>(value)?)
        }
        _ => WebhookEvent::Unknown(kind),
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_browser_frame() {
        let message = decode_chat_message(br#"{"id":"m1","text":"hi"}"#).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.content, "hi");
        assert_eq!(message.request_id, "");
        assert_eq!(message.user_id, "");
    }

    #[test]
    fn rejects_non_json_browser_frame() {
        let err = decode_chat_message(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn browser_frame_reencodes_field_for_field() {
        let input = br#"{"id":"m7","reqid":"r7","trackingId":"t7","text":"hello","userId":"spoofed"}"#;
        let mut decoded = decode_chat_message(input).unwrap();
        decoded.user_id = "u1".into();

        let reencoded = serde_json::to_vec(&decoded).unwrap();
        let again = decode_chat_message(&reencoded).unwrap();

        assert_eq!(again.id, "m7");
        assert_eq!(again.request_id, "r7");
        assert_eq!(again.tracking_id, "t7");
        assert_eq!(again.content, "hello");
        assert_eq!(again.user_id, "u1");
    }

    #[test]
    fn error_frame_has_empty_ids() {
        let frame = encode_error_frame("expected value at line 1 column 1").unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["messageId"], "");
        assert_eq!(value["reqid"], "");
        assert_eq!(value["error"], "expected value at line 1 column 1");
    }

    #[test]
    fn create_chat_requires_user() {
        let request =
            decode_create_chat(br#"{"account":"a","secret":"s","userId":"u1"}"#).unwrap();
        assert_eq!(request.user_id, "u1");

        assert!(matches!(
            decode_create_chat(br#"{"account":"a"}"#),
            Err(CodecError::MissingUserId)
        ));
        assert!(matches!(decode_create_chat(b"{"), Err(CodecError::Json(_))));
    }

    #[test]
    fn decodes_lowercase_text_webhook() {
        let body = br#"{"channel":{"to":{"id":"u1"}},"type":"text","text":"hello from cloud"}"#;
        match decode_webhook(body).unwrap() {
            WebhookEvent::Text(text) => {
                assert_eq!(text.recipient(), Some("u1"));
                assert_eq!(text.text, "hello from cloud");
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn decodes_provider_text_webhook() {
        let body = br#"{
            "id": "a3f1",
            "channel": {
                "id": "1b7bb6a0-12f2-4d4b-8e1e-5b6f0b0d2d33",
                "platform": "Open",
                "type": "Private",
                "to": {"id": "u1"},
                "from": {"nickname": "Agent", "id": "agent-1", "idType": "Opaque"},
                "time": "2021-04-09T04:43:33.456Z",
                "messageId": "a3f1"
            },
            "type": "Text",
            "text": "Hi there",
            "originatingEntity": "Human",
            "direction": "Outbound"
        }"#;
        let event = decode_webhook(body).unwrap();
        assert_eq!(event.kind(), "Text");
        let WebhookEvent::Text(text) = event else {
            panic!("expected text");
        };
        assert_eq!(text.id.as_deref(), Some("a3f1"));
        assert_eq!(text.direction.as_deref(), Some("Outbound"));
        assert!(text.channel.time.is_some());
    }

    #[test]
    fn text_without_recipient_is_rejected() {
        let body = br#"{"type":"Text","text":"orphan","channel":{}}"#;
        assert!(matches!(
            decode_webhook(body),
            Err(CodecError::MissingRecipient)
        ));
    }

    #[test]
    fn receipt_and_event_are_recognized() {
        let receipt = br#"{"id":"m1","type":"Receipt","status":"Delivered","channel":{"to":{"id":"u1"}}}"#;
        match decode_webhook(receipt).unwrap() {
            WebhookEvent::Receipt(r) => assert_eq!(r.status.as_deref(), Some("Delivered")),
            other => panic!("expected receipt, got {other:?}"),
        }

        let event = br#"{"type":"Event","channel":{},"events":[{"eventType":"Typing"}]}"#;
        assert!(matches!(decode_webhook(event).unwrap(), WebhookEvent::Event(_)));
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let body = br#"{"type":"Hologram","channel":{}}"#;
        assert_eq!(
            decode_webhook(body).unwrap(),
            WebhookEvent::Unknown("Hologram".into())
        );
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(matches!(
            decode_webhook(br#"{"text":"no type"}"#),
            Err(CodecError::MissingType)
        ));
        assert!(matches!(decode_webhook(b"[]"), Err(CodecError::MissingType)));
        assert!(matches!(decode_webhook(b"nope"), Err(CodecError::Json(_))));
    }
}
