//! Authenticated JSON client for the Genesys Cloud platform API.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::oauth::{ClientCredentials, TokenSource};
use crate::upstream::UpstreamError;

/// Base URLs for one Genesys Cloud region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesysEndpoints {
    /// `https://api.<region>`
    pub api_base: String,
    /// `https://login.<region>/oauth/token`
    pub token_url: String,
}

impl GenesysEndpoints {
    pub fn for_region(region: &str) -> Self {
        let region = region.trim().trim_matches('.');
        Self {
            api_base: format!("https://api.{region}"),
            token_url: format!("https://login.{region}/oauth/token"),
        }
    }
}

pub struct GenesysClient {
    http: reqwest::Client,
    api_base: String,
    tokens: TokenSource,
}

impl GenesysClient {
    pub fn new(
        endpoints: GenesysEndpoints,
        credentials: Option<ClientCredentials>,
        static_token: Option<String>,
    ) -> Self {
        let http = reqwest::Client::new();
        let tokens = TokenSource::new(
            http.clone(),
            endpoints.token_url,
            credentials,
            static_token,
        );
        Self {
            http,
            api_base: endpoints.api_base.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenSource {
        &self.tokens
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, UpstreamError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, UpstreamError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    async fn request<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, UpstreamError> {
        let token = self.tokens.token().await?;
        let url = format!("{}{}", self.api_base, path);
        debug!(
            component = "genesys",
            event = "genesys.request",
            method = %method,
            url = %url,
            "Calling platform API"
        );

        let mut req = self.http.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Auth(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}
