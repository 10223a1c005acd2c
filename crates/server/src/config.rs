//! Command line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::genesys::GenesysEndpoints;
use crate::integration::IntegrationSettings;
use crate::oauth::ClientCredentials;

/// Relay between browser chats and Genesys Cloud Open Messaging
#[derive(Parser, Clone, Debug)]
#[command(name = "chatrelay", version, about)]
pub struct Cli {
    /// Genesys Cloud region, e.g. mypurecloud.com or mypurecloud.ie
    #[arg(long, env = "PURECLOUD_REGION", default_value = "mypurecloud.com")]
    pub region: String,

    /// OAuth client id
    #[arg(long = "clientid", env = "PURECLOUD_CLIENTID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long = "secret", env = "PURECLOUD_CLIENTSECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Pre-issued bearer token, used until the provider rejects it
    #[arg(long = "token", env = "PURECLOUD_CLIENTTOKEN", hide_env_values = true)]
    pub client_token: Option<String>,

    /// Name of the Open Messaging integration to find or create
    #[arg(long = "integration", env = "INTEGRATION_NAME")]
    pub integration_name: Option<String>,

    /// Integration id; skips resolution by name
    #[arg(long, env = "INTEGRATION_ID")]
    pub integration_id: Option<String>,

    /// Webhook URL registered on the integration
    #[arg(long = "webhook", env = "INTEGRATION_WEBHOOK")]
    pub webhook_url: Option<String>,

    /// Secret used to sign and verify webhook bodies
    #[arg(long, env = "INTEGRATION_TOKEN", hide_env_values = true)]
    pub webhook_token: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Upper bound on draining sessions at shutdown (`15s`, `2m` or seconds)
    #[arg(long, env = "GRACEFUL_TIMEOUT", default_value = "15s", value_parser = parse_duration)]
    pub graceful_timeout: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("webhook token is required (--webhook-token or INTEGRATION_TOKEN)")]
    MissingWebhookToken,

    #[error("port must not be 0")]
    InvalidPort,

    #[error("no way to obtain an integration id: set --integration-id, or --integration and --webhook with credentials")]
    NoIntegration,
}

/// How the relay learns its integration id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationSource {
    Fixed(String),
    Resolve {
        name: String,
        webhook_url: String,
    },
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub endpoints: GenesysEndpoints,
    pub credentials: Option<ClientCredentials>,
    pub client_token: Option<String>,
    pub integration: IntegrationSource,
    pub webhook_token: String,
    pub graceful_timeout: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Like [`non_empty`] but keeps surrounding whitespace, for signing keys.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let webhook_token = non_blank(cli.webhook_token).ok_or(ConfigError::MissingWebhookToken)?;
        if cli.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let credentials = match (non_empty(cli.client_id), non_empty(cli.client_secret)) {
            (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
                client_id,
                client_secret,
            }),
            _ => None,
        };
        let client_token = non_empty(cli.client_token);

        let integration = match (
            non_empty(cli.integration_id),
            non_empty(cli.integration_name),
            non_empty(cli.webhook_url),
        ) {
            (Some(id), _, _) => IntegrationSource::Fixed(id),
            (None, Some(name), Some(webhook_url))
                if credentials.is_some() || client_token.is_some() =>
            {
                IntegrationSource::Resolve { name, webhook_url }
            }
            _ => return Err(ConfigError::NoIntegration),
        };

        Ok(Self {
            listen_addr: SocketAddr::new(cli.bind, cli.port),
            endpoints: GenesysEndpoints::for_region(&cli.region),
            credentials,
            client_token,
            integration,
            webhook_token,
            graceful_timeout: cli.graceful_timeout,
        })
    }

    /// Integration to resolve, when not given by id.
    pub fn integration_settings(&self) -> Option<IntegrationSettings> {
        match &self.integration {
            IntegrationSource::Fixed(_) => None,
            IntegrationSource::Resolve { name, webhook_url } => Some(IntegrationSettings {
                name: name.clone(),
                webhook_url: webhook_url.clone(),
                webhook_token: self.webhook_token.clone(),
            }),
        }
    }
}

/// Parse `15s`, `2m`, `1h 30m` or a plain number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).map_err(|e| format!("invalid duration `{value}`: {e}"))
}
