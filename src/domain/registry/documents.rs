//! Storage for published, signed status-list documents.
//!
//! Documents are keyed `{b|t}/{suffix}` and served verbatim by the public
//! delivery layer; the entry store remains the source of truth.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedDocument {
    pub content_type: String,
    pub body: String,
}

/// Abstract interface for the published-document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        body: &str,
    ) -> Result<(), DocumentError>;

    async fn get(&self, key: &str) -> Result<Option<PublishedDocument>, DocumentError>;
}

/// Represents an in-memory document store, used in tests and local runs.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: DashMap<String, PublishedDocument>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, key: &str, content_type: &str, body: &str) -> Result<(), DocumentError> {
        self.documents.insert(
            key.to_string(),
            PublishedDocument {
                content_type: content_type.to_string(),
                body: body.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<PublishedDocument>, DocumentError> {
        Ok(self.documents.get(key).map(|d| d.value().clone()))
    }
}

/// Redis-based document store.
pub struct RedisDocumentStore {
    conn: ConnectionManager,
}

fn document_key(key: &str) -> String {
    format!("statuslist:document:{key}")
}

impl RedisDocumentStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn put(&self, key: &str, content_type: &str, body: &str) -> Result<(), DocumentError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(
                document_key(key),
                &[("contentType", content_type), ("body", body)],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<PublishedDocument>, DocumentError> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(document_key(key)).await?;
        match (fields.get("contentType"), fields.get("body")) {
            (Some(content_type), Some(body)) => Ok(Some(PublishedDocument {
                content_type: content_type.clone(),
                body: body.clone(),
            })),
            _ => Ok(None),
        }
    }
}
