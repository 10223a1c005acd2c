//! Bearer tokens for the Genesys Cloud API.
//!
//! A pre-issued token is used first when configured. Otherwise (or once it
//! is rejected) tokens come from the client-credentials grant and are cached
//! until shortly before they expire.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::upstream::UpstreamError;

/// Refresh this long before the provider says the token expires.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    /// `None` for a pre-issued token whose lifetime is unknown.
    refresh_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.refresh_at.map_or(true, |at| Instant::now() < at)
    }
}

pub struct TokenSource {
    http: reqwest::Client,
    token_url: String,
    credentials: Option<ClientCredentials>,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        credentials: Option<ClientCredentials>,
        static_token: Option<String>,
    ) -> Self {
        let cache = static_token
            .filter(|token| !token.is_empty())
            .map(|value| CachedToken {
                value,
                refresh_at: None,
            });
        Self {
            http,
            token_url: token_url.into(),
            credentials,
            cache: Mutex::new(cache),
        }
    }

    /// Current bearer token, fetching a new one when needed.
    pub async fn token(&self) -> Result<String, UpstreamError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref().filter(|cached| cached.is_fresh()) {
            return Ok(cached.value.clone());
        }

        let fetched = self.fetch().await?;
        let value = fetched.value.clone();
        *cache = Some(fetched);
        Ok(value)
    }

    /// Forget the cached token after the provider rejected it.
    pub async fn invalidate(&self) {
        if self.cache.lock().await.take().is_some() {
            warn!(
                component = "oauth",
                event = "oauth.token.invalidated",
                "Bearer token rejected, cleared cache"
            );
        }
    }

    async fn fetch(&self) -> Result<CachedToken, UpstreamError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            UpstreamError::Auth("no client credentials configured".to_string())
        })?;

        debug!(
            component = "oauth",
            event = "oauth.token.fetch",
            token_url = %self.token_url,
            "Requesting client credentials token"
        );

        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Auth(format!(
                "token request failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(UpstreamError::Auth("empty access token".to_string()));
        }

        let refresh_at = token.expires_in.map(|secs| {
            Instant::now() + Duration::from_secs(secs).saturating_sub(EXPIRY_BUFFER)
        });
        info!(
            component = "oauth",
            event = "oauth.token.issued",
            expires_in = token.expires_in,
            "Obtained client credentials token"
        );
        Ok(CachedToken {
            value: token.access_token,
            refresh_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Option<ClientCredentials> {
        Some(ClientCredentials {
            client_id: "client".into(),
            client_secret: "secret".into(),
        })
    }

    async fn token_server(expires_in: u64, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "token_type": "bearer",
                "expires_in": expires_in
            })))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn caches_client_credentials_token() {
        let server = token_server(86_400, 1).await;
        let source = TokenSource::new(
            reqwest::Client::new(),
            format!("{}/oauth/token", server.uri()),
            credentials(),
            None,
        );

        assert_eq!(source.token().await.unwrap(), "fresh-token");
        assert_eq!(source.token().await.unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn short_lived_tokens_are_refetched() {
        // Anything under the expiry buffer is already due for refresh.
        let server = token_server(30, 2).await;
        let source = TokenSource::new(
            reqwest::Client::new(),
            format!("{}/oauth/token", server.uri()),
            credentials(),
            None,
        );

        source.token().await.unwrap();
        source.token().await.unwrap();
    }

    #[tokio::test]
    async fn static_token_is_used_until_invalidated() {
        let server = token_server(86_400, 1).await;
        let source = TokenSource::new(
            reqwest::Client::new(),
            format!("{}/oauth/token", server.uri()),
            credentials(),
            Some("preissued".into()),
        );

        assert_eq!(source.token().await.unwrap(), "preissued");
        source.invalidate().await;
        assert_eq!(source.token().await.unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn rejected_grant_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad client"))
            .mount(&server)
            .await;
        let source = TokenSource::new(
            reqwest::Client::new(),
            format!("{}/oauth/token", server.uri()),
            credentials(),
            None,
        );

        let err = source.token().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Auth(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn no_credentials_and_no_token() {
        let source = TokenSource::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/oauth/token",
            None,
            Some(String::new()),
        );
        assert!(matches!(
            source.token().await,
            Err(UpstreamError::Auth(_))
        ));
    }
}
