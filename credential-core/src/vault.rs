//! Vault adapter seam: the engine only sees a `fetch` returning flat
//! credential fields or a typed not-found/unavailable signal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{CredentialPayload, ResourceDescriptor, ResourceType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("resource not found")]
    NotFound,
    #[error("vault unavailable: {0}")]
    Unavailable(String),
}

/// External secrets store the broker fetches raw material from.
#[async_trait]
pub trait VaultAdapter: Send + Sync {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<CredentialPayload, VaultError>;
}

/// Thin call-through to an external vault REST API.
#[derive(Clone)]
pub struct HttpVaultAdapter {
    base_url: Url,
    client: reqwest::Client,
    token: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    fields: CredentialPayload,
}

impl HttpVaultAdapter {
    pub fn new(base_url: impl AsRef<str>, token: impl Into<String>) -> Result<Self, VaultError> {
        let url = Url::parse(base_url.as_ref())
            .map_err(|err| VaultError::Unavailable(err.to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent("credential-broker/0.1")
            .build()
            .map_err(|err| VaultError::Unavailable(err.to_string()))?;
        Ok(Self {
            base_url: url,
            client,
            token: token.into(),
            timeout: Duration::from_secs(10),
        })
    }

    /// Override the per-request timeout (default 10 seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl VaultAdapter for HttpVaultAdapter {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<CredentialPayload, VaultError> {
        let path = format!(
            "v1/items/{kind}/{name}",
            kind = descriptor.resource_type,
            name = descriptor.name
        );
        let url = self
            .base_url
            .join(&path)
            .map_err(|err| VaultError::Unavailable(err.to_string()))?;

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| VaultError::Unavailable(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(VaultError::NotFound);
        }
        let response = response
            .error_for_status()
            .map_err(|err| VaultError::Unavailable(err.to_string()))?;
        let payload = response
            .json::<FetchResponse>()
            .await
            .map_err(|err| VaultError::Unavailable(err.to_string()))?;
        Ok(payload.fields)
    }
}

/// In-memory vault for tests and development setups.
#[derive(Default)]
pub struct MemoryVault {
    items: RwLock<HashMap<(ResourceType, String), CredentialPayload>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(
        &self,
        resource_type: ResourceType,
        name: impl Into<String>,
        fields: CredentialPayload,
    ) {
        self.items
            .write()
            .await
            .insert((resource_type, name.into()), fields);
    }
}

#[async_trait]
impl VaultAdapter for MemoryVault {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<CredentialPayload, VaultError> {
        self.items
            .read()
            .await
            .get(&(descriptor.resource_type, descriptor.name.clone()))
            .cloned()
            .ok_or(VaultError::NotFound)
    }
}
