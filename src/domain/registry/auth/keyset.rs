//! Fetching a client's published key set.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use super::jws::JsonWebKeySet;

#[derive(Debug, Error)]
pub enum KeySetError {
    #[error("Failed to fetch JWKS: {0}")]
    Fetch(String),
    #[error("Failed to parse JWKS data: {0}")]
    Parse(String),
    #[error("JWKS fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("No key set registered for {0}")]
    Unknown(String),
}

/// Abstract interface for resolving a JWKS-like endpoint to its key set.
///
/// The production implementation fetches over HTTPS; tests inject a static
/// map so no network is involved.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch(&self, jwks_uri: &str) -> Result<JsonWebKeySet, KeySetError>;
}

/// HTTPS-backed key-set fetcher, bounded by a timeout.
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpKeySetFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self, jwks_uri: &str) -> Result<JsonWebKeySet, KeySetError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(jwks_uri).send())
            .await
            .map_err(|_| KeySetError::Timeout(self.timeout))?
            .map_err(|e| KeySetError::Fetch(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| KeySetError::Fetch(e.to_string()))?;

        tokio::time::timeout(self.timeout, response.json::<JsonWebKeySet>())
            .await
            .map_err(|_| KeySetError::Timeout(self.timeout))?
            .map_err(|e| KeySetError::Parse(e.to_string()))
    }
}

/// In-memory key sets keyed by their endpoint URI.
#[derive(Default)]
pub struct StaticKeySets {
    sets: HashMap<String, JsonWebKeySet>,
}

impl StaticKeySets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, jwks_uri: impl Into<String>, set: JsonWebKeySet) -> Self {
        self.sets.insert(jwks_uri.into(), set);
        self
    }
}

#[async_trait]
impl KeySetFetcher for StaticKeySets {
    async fn fetch(&self, jwks_uri: &str) -> Result<JsonWebKeySet, KeySetError> {
        self.sets
            .get(jwks_uri)
            .cloned()
            .ok_or_else(|| KeySetError::Unknown(jwks_uri.to_string()))
    }
}
