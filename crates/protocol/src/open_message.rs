//! Genesys Cloud Open Messaging envelopes
//!
//! Only the fields the relay reads or writes are modelled; everything else in
//! a provider payload is ignored on decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform value for Open Messaging channels.
pub const OPEN_PLATFORM: &str = "Open";

/// Who a message is addressed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessageTo {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_type: Option<String>,
}

/// Sender profile of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessageFrom {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Channel addressing carried by every Open Messaging envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessageChannel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// `Private` or `Public`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<OpenMessageTo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<OpenMessageFrom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

/// A text message, either received from the provider on the webhook or
/// decoded from a provider response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessageText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub channel: OpenMessageChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl OpenMessageText {
    /// User id the message is addressed to (`channel.to.id`), if present.
    pub fn recipient(&self) -> Option<&str> {
        self.channel
            .to
            .as_ref()
            .map(|to| to.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Delivery receipt for a message previously sent upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessageReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub channel: OpenMessageChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final_receipt: Option<bool>,
}

/// Common header of the variants the relay acknowledges without acting on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessageHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub channel: OpenMessageChannel,
}

/// A decoded webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Text(OpenMessageText),
    Receipt(OpenMessageReceipt),
    Event(OpenMessageHeader),
    Structured(OpenMessageHeader),
    /// Discriminator the relay does not know, kept verbatim for logging.
    Unknown(String),
}

impl WebhookEvent {
    /// Discriminator name, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text(_) => "Text",
            Self::Receipt(_) => "Receipt",
            Self::Event(_) => "Event",
            Self::Structured(_) => "Structured",
            Self::Unknown(kind) => kind,
        }
    }
}

/// Body posted to `/api/v2/conversations/messages/inbound/open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessageInbound {
    pub id: String,
    pub channel: OpenMessageChannel,
    pub direction: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl OpenMessageInbound {
    /// Build an inbound text message from `from`, addressed to the
    /// integration identified by `integration_id`.
    pub fn text(
        message_id: impl Into<String>,
        integration_id: impl Into<String>,
        from: OpenMessageFrom,
        text: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        let message_id = message_id.into();
        Self {
            id: message_id.clone(),
            channel: OpenMessageChannel {
                id: None,
                platform: Some(OPEN_PLATFORM.to_string()),
                kind: Some("Private".to_string()),
                message_id: Some(message_id),
                to: Some(OpenMessageTo {
                    id: integration_id.into(),
                    id_type: None,
                }),
                from: Some(from),
                time: Some(time),
            },
            direction: "Inbound".to_string(),
            kind: "Text".to_string(),
            text: text.into(),
        }
    }
}

/// What the provider answers to an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessageResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub channel: OpenMessageChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_text_addresses_the_integration() {
        let from = OpenMessageFrom {
            id: "u1".into(),
            id_type: Some("email".into()),
            ..Default::default()
        };
        let time = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let inbound = OpenMessageInbound::text("m1", "integration-1", from, "hi", time);

        let value = serde_json::to_value(&inbound).unwrap();
        assert_eq!(value["id"], "m1");
        assert_eq!(value["type"], "Text");
        assert_eq!(value["direction"], "Inbound");
        assert_eq!(value["text"], "hi");
        assert_eq!(value["channel"]["platform"], "Open");
        assert_eq!(value["channel"]["type"], "Private");
        assert_eq!(value["channel"]["messageId"], "m1");
        assert_eq!(value["channel"]["to"]["id"], "integration-1");
        assert_eq!(value["channel"]["from"]["id"], "u1");
        assert_eq!(value["channel"]["from"]["idType"], "email");
    }

    #[test]
    fn recipient_ignores_empty_ids() {
        let mut text = OpenMessageText::default();
        assert_eq!(text.recipient(), None);

        text.channel.to = Some(OpenMessageTo::default());
        assert_eq!(text.recipient(), None);

        text.channel.to = Some(OpenMessageTo {
            id: "u1".into(),
            id_type: None,
        });
        assert_eq!(text.recipient(), Some("u1"));
    }
}
