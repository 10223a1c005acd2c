//! Delivery of browser messages to the provider.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use chatrelay_protocol::{ChatMessage, OpenMessageFrom, OpenMessageInbound, OpenMessageResult};

use crate::genesys::GenesysClient;

pub const INBOUND_OPEN_PATH: &str = "/api/v2/conversations/messages/inbound/open";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid provider response: {0}")]
    Decode(String),
}

/// Sends one browser message to the provider and returns its remote id.
#[async_trait]
pub trait UpstreamSender: Send + Sync {
    async fn send_message(&self, message: &ChatMessage) -> Result<String, UpstreamError>;
}

/// Display profile attached to every inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderProfile {
    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub image_url: String,
}

impl Default for SenderProfile {
    fn default() -> Self {
        Self {
            first_name: "Bob".to_string(),
            last_name: "Minion".to_string(),
            nickname: "Bob the Minion".to_string(),
            image_url: "https://www.genesys.com/media/avatar-placeholder.png".to_string(),
        }
    }
}

impl SenderProfile {
    fn from_for(&self, user_id: &str) -> OpenMessageFrom {
        OpenMessageFrom {
            id: user_id.to_string(),
            id_type: Some("email".to_string()),
            first_name: Some(self.first_name.clone()),
            last_name: Some(self.last_name.clone()),
            nickname: Some(self.nickname.clone()),
            image_url: Some(self.image_url.clone()),
        }
    }
}

/// Posts messages to the Open Messaging inbound endpoint.
pub struct GenesysSender {
    client: Arc<GenesysClient>,
    integration_id: String,
    profile: SenderProfile,
}

impl GenesysSender {
    pub fn new(client: Arc<GenesysClient>, integration_id: impl Into<String>) -> Self {
        Self {
            client,
            integration_id: integration_id.into(),
            profile: SenderProfile::default(),
        }
    }

    pub fn with_profile(mut self, profile: SenderProfile) -> Self {
        self.profile = profile;
        self
    }
}

#[async_trait]
impl UpstreamSender for GenesysSender {
    async fn send_message(&self, message: &ChatMessage) -> Result<String, UpstreamError> {
        let inbound = OpenMessageInbound::text(
            message.id.clone(),
            self.integration_id.clone(),
            self.profile.from_for(&message.user_id),
            message.content.clone(),
            Utc::now(),
        );
        let result: OpenMessageResult = self.client.post(INBOUND_OPEN_PATH, &inbound).await?;
        Ok(result.id)
    }
}
