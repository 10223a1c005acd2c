//! Browser ↔ relay messages

use serde::{Deserialize, Serialize};

/// A chat message typed by the browser user.
///
/// `id` is chosen by the browser and reused as the provider-facing message
/// id. `user_id` is always overwritten by the relay with the owning
/// session's user before the message goes anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "reqid", default)]
    pub request_id: String,
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "trackingId", default)]
    pub tracking_id: String,
    #[serde(rename = "text", default)]
    pub content: String,
}

/// Frame sent back to the browser when one of its frames could not be
/// decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageError {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "reqid")]
    pub request_id: String,
    pub error: String,
}

impl ChatMessageError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            message_id: String::new(),
            request_id: String::new(),
            error: error.into(),
        }
    }
}

/// Body of `POST /chat`.
///
/// `account` and `secret` are accepted for compatibility with the browser
/// widget; the relay does not check them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub secret: String,
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

/// Response of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChatResponse {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_uses_browser_field_names() {
        let message = ChatMessage {
            id: "m1".into(),
            request_id: "r1".into(),
            user_id: "u1".into(),
            tracking_id: "t1".into(),
            content: "hi".into(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["id"], "m1");
        assert_eq!(value["reqid"], "r1");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["trackingId"], "t1");
        assert_eq!(value["text"], "hi");
    }
}
