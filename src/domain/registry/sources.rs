//! Reference-data sources: the client registry and the status-list
//! configuration documents.
//!
//! Both are owned by an external configuration store and re-read on every
//! use, so an operator-side update is picked up without a restart.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::common::models::{ClientRegistry, ListConfiguration};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait ClientRegistrySource: Send + Sync {
    async fn load(&self) -> Result<ClientRegistry, SourceError>;
}

#[async_trait]
pub trait ListConfigSource: Send + Sync {
    async fn load(&self) -> Result<ListConfiguration, SourceError>;
}

/// File-backed client registry document.
pub struct FileClientRegistry {
    path: PathBuf,
}

impl FileClientRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ClientRegistrySource for FileClientRegistry {
    async fn load(&self) -> Result<ClientRegistry, SourceError> {
        read_json(&self.path).await
    }
}

/// File-backed status-list configuration document.
pub struct FileListConfiguration {
    path: PathBuf,
}

impl FileListConfiguration {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ListConfigSource for FileListConfiguration {
    async fn load(&self) -> Result<ListConfiguration, SourceError> {
        read_json(&self.path).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T, SourceError> {
    let display = path.display().to_string();
    let raw = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| SourceError::Parse {
        path: display,
        source,
    })
}

/// Fixed in-memory registry, for tests and local runs.
pub struct StaticClientRegistry(pub ClientRegistry);

#[async_trait]
impl ClientRegistrySource for StaticClientRegistry {
    async fn load(&self) -> Result<ClientRegistry, SourceError> {
        Ok(self.0.clone())
    }
}

/// Fixed in-memory list configuration, for tests and local runs.
pub struct StaticListConfiguration(pub ListConfiguration);

#[async_trait]
impl ListConfigSource for StaticListConfiguration {
    async fn load(&self) -> Result<ListConfiguration, SourceError> {
        Ok(self.0.clone())
    }
}
