//! Session credentials
//!
//! Each session starts by fetching a short-lived token. The token service
//! may also dictate the model and system instruction for the session.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{Error, Result};

/// Credential and session parameters for one session
#[derive(Debug)]
pub struct SessionToken {
    /// Ephemeral access token
    pub token: SecretString,
    /// Model override
    pub model: Option<String>,
    /// System instruction override
    pub system_instruction: Option<String>,
}

impl SessionToken {
    /// Token with no overrides
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            model: None,
            system_instruction: None,
        }
    }
}

/// Hands out session tokens
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a token for a new session
    ///
    /// # Errors
    ///
    /// Returns error if no token can be obtained
    async fn fetch(&self) -> Result<SessionToken>;
}

/// Provider returning a fixed token
#[derive(Debug)]
pub struct StaticTokenProvider {
    token: SecretString,
}

impl StaticTokenProvider {
    /// Always hand out `token`
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch(&self) -> Result<SessionToken> {
        Ok(SessionToken::new(self.token.expose_secret()))
    }
}

/// Response from a token endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system_instruction: Option<String>,
}

/// Provider that POSTs to a token endpoint
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    client: Client,
    url: String,
}

impl HttpTokenProvider {
    /// Fetch tokens from `url`
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch(&self) -> Result<SessionToken> {
        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| Error::Token(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Token(format!("token request failed: {status} - {body}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Token(format!("invalid token response: {e}")))?;

        if body.token.is_empty() {
            return Err(Error::Token("token response carried an empty token".to_string()));
        }

        tracing::debug!(model = body.model.as_deref().unwrap_or(""), "session token fetched");

        Ok(SessionToken {
            token: SecretString::from(body.token),
            model: body.model,
            system_instruction: body.system_instruction,
        })
    }
}
