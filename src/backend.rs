//! Client for the configuration and credential services
//!
//! The backend hands out the live session settings (`GET /config`) and a
//! short-lived access credential (`GET /token`).

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Live session settings negotiated once per session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// API version used in the endpoint path (e.g. "v1alpha")
    pub api_version: String,
    /// Model identifier
    pub model: String,
    /// System instruction for the assistant
    #[serde(default)]
    pub system_instruction: String,
    /// Prebuilt response voice
    pub voice_name: String,
}

/// Short-lived access credential
#[derive(Debug)]
pub struct Credential {
    /// Token passed to the live endpoint
    pub token: SecretString,
}

/// Body of `GET /token`
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    error: Option<String>,
}

/// Source of session configuration and credentials
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the live session settings
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigFetch` on any failure
    async fn fetch_config(&self) -> Result<RemoteConfig>;

    /// Fetch an access credential
    ///
    /// # Errors
    ///
    /// Returns `Error::CredentialFetch` on any failure
    async fn fetch_credential(&self) -> Result<Credential>;
}

/// HTTP backend client
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the backend at `base_url`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_config(&self) -> Result<RemoteConfig> {
        let url = format!("{}/config", self.base_url);
        tracing::debug!(%url, "fetching session config");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ConfigFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ConfigFetch(format!("{url} returned {status}")));
        }

        response
            .json::<RemoteConfig>()
            .await
            .map_err(|e| Error::ConfigFetch(format!("invalid config body: {e}")))
    }

    async fn fetch_credential(&self) -> Result<Credential> {
        let url = format!("{}/token", self.base_url);
        tracing::debug!(%url, "fetching access token");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::CredentialFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CredentialFetch(format!("{url} returned {status}")));
        }

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::CredentialFetch(format!("invalid token body: {e}")))?;

        parse_token(body)
    }
}

fn parse_token(body: TokenResponse) -> Result<Credential> {
    if let Some(error) = body.error {
        return Err(Error::CredentialFetch(error));
    }

    match body.token {
        Some(token) if !token.is_empty() => Ok(Credential {
            token: SecretString::from(token),
        }),
        _ => Err(Error::CredentialFetch("token missing from response".to_string())),
    }
}
