//! Resolution of the Open Messaging integration at startup.
//!
//! The relay needs the integration id to address inbound messages. Given a
//! name it finds the integration, creates it when missing, and keeps its
//! webhook URL and signing token in line with the local configuration.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::genesys::GenesysClient;
use crate::upstream::UpstreamError;

pub const INTEGRATIONS_PATH: &str = "/api/v2/conversations/messaging/integrations/open";

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessagingIntegration {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_notification_webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_notification_webhook_signature_secret_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntegrationPage {
    #[serde(default)]
    entities: Vec<OpenMessagingIntegration>,
    #[serde(default)]
    page_number: u32,
    #[serde(default)]
    page_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IntegrationRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    outbound_notification_webhook_url: &'a str,
    outbound_notification_webhook_signature_secret_token: &'a str,
}

/// What the integration should look like.
#[derive(Debug, Clone)]
pub struct IntegrationSettings {
    pub name: String,
    pub webhook_url: String,
    pub webhook_token: String,
}

/// Every Open Messaging integration of the organization.
pub async fn list_integrations(
    client: &GenesysClient,
) -> Result<Vec<OpenMessagingIntegration>, UpstreamError> {
    let mut integrations = Vec::new();
    let mut page_number = 1;
    loop {
        let page: IntegrationPage = client
            .get(&format!(
                "{INTEGRATIONS_PATH}?pageSize={PAGE_SIZE}&pageNumber={page_number}"
            ))
            .await?;
        integrations.extend(page.entities);
        if page.page_count <= page.page_number.max(page_number) {
            break;
        }
        page_number += 1;
    }
    Ok(integrations)
}

/// Find the integration named `name`, ignoring case.
pub async fn find_integration(
    client: &GenesysClient,
    name: &str,
) -> Result<Option<OpenMessagingIntegration>, UpstreamError> {
    let wanted = name.to_lowercase();
    Ok(list_integrations(client)
        .await?
        .into_iter()
        .find(|integration| integration.name.to_lowercase() == wanted))
}

pub async fn create_integration(
    client: &GenesysClient,
    settings: &IntegrationSettings,
) -> Result<OpenMessagingIntegration, UpstreamError> {
    client
        .post(
            INTEGRATIONS_PATH,
            &IntegrationRequest {
                name: Some(&settings.name),
                outbound_notification_webhook_url: &settings.webhook_url,
                outbound_notification_webhook_signature_secret_token: &settings.webhook_token,
            },
        )
        .await
}

pub async fn update_integration(
    client: &GenesysClient,
    id: &str,
    settings: &IntegrationSettings,
) -> Result<OpenMessagingIntegration, UpstreamError> {
    client
        .patch(
            &format!("{INTEGRATIONS_PATH}/{id}"),
            &IntegrationRequest {
                name: None,
                outbound_notification_webhook_url: &settings.webhook_url,
                outbound_notification_webhook_signature_secret_token: &settings.webhook_token,
            },
        )
        .await
}

/// Whether the provider's copy differs from `settings`.
///
/// The provider usually omits the secret token on reads; it only counts as
/// different when it is present.
fn needs_update(existing: &OpenMessagingIntegration, settings: &IntegrationSettings) -> bool {
    let url_differs =
        existing.outbound_notification_webhook_url.as_deref() != Some(settings.webhook_url.as_str());
    let token_differs = existing
        .outbound_notification_webhook_signature_secret_token
        .as_deref()
        .is_some_and(|token| token != settings.webhook_token);
    url_differs || token_differs
}

/// Find, create or update the integration described by `settings`.
pub async fn resolve_integration(
    client: &GenesysClient,
    settings: &IntegrationSettings,
) -> Result<OpenMessagingIntegration, UpstreamError> {
    let Some(existing) = find_integration(client, &settings.name).await? else {
        let created = create_integration(client, settings).await?;
        info!(
            component = "integration",
            event = "integration.created",
            integration_id = %created.id,
            name = %settings.name,
            "Created Open Messaging integration"
        );
        return Ok(created);
    };

    if needs_update(&existing, settings) {
        let updated = update_integration(client, &existing.id, settings).await?;
        info!(
            component = "integration",
            event = "integration.updated",
            integration_id = %updated.id,
            webhook_url = %settings.webhook_url,
            "Updated Open Messaging integration webhook"
        );
        return Ok(updated);
    }

    info!(
        component = "integration",
        event = "integration.found",
        integration_id = %existing.id,
        name = %existing.name,
        "Using existing Open Messaging integration"
    );
    Ok(existing)
}
