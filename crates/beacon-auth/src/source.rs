//! Where key sets come from.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::KeyRefreshError;
use crate::jwk::JwkSet;

/// Well-known path of the key set below the issuer URL.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Per-request timeout for key fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Key-set URL for an issuer.
#[must_use]
pub fn jwks_url(issuer: &str) -> String {
    format!("{}{JWKS_PATH}", issuer.trim_end_matches('/'))
}

/// A provider of key-set documents.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the current document.
    async fn fetch(&self) -> Result<JwkSet, KeyRefreshError>;

    /// Human readable location, for logs.
    fn location(&self) -> &str;
}

/// Fetches the key set over HTTP from the issuer's well-known endpoint.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    /// Source for `issuer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(issuer: &str) -> Result<Self, KeyRefreshError> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: jwks_url(issuer),
        })
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet, KeyRefreshError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyRefreshError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        debug!(url = %self.url, size = body.len(), "Fetched key set");
        serde_json::from_slice(&body)
            .map_err(|e| KeyRefreshError::Decode(e.to_string()))
    }

    fn location(&self) -> &str {
        &self.url
    }
}
