//! The slot pool: a queue of pre-allocated `(uri, idx)` pairs per list type.
//!
//! No ordering guarantee is required here; the pool is pure capacity.
//! Delivery is at-least-once, which the issuance claim path tolerates by
//! writing conditionally.

use std::collections::VecDeque;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::common::models::SlotPair;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("queued slot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Abstract interface for a slot pool backend.
#[async_trait]
pub trait SlotQueue: Send + Sync {
    /// Enqueue a batch of freshly allocated slots.
    async fn push_batch(&self, pairs: &[SlotPair]) -> Result<(), QueueError>;

    /// Take one pending slot, if any.
    async fn pop(&self) -> Result<Option<SlotPair>, QueueError>;

    /// Approximate number of pending slots.
    async fn depth(&self) -> Result<usize, QueueError>;
}

/// Represents an in-memory slot pool, used in tests and local runs.
#[derive(Default)]
pub struct InMemorySlotQueue {
    pairs: Mutex<VecDeque<SlotPair>>,
}

impl InMemorySlotQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotQueue for InMemorySlotQueue {
    async fn push_batch(&self, pairs: &[SlotPair]) -> Result<(), QueueError> {
        self.pairs.lock().await.extend(pairs.iter().cloned());
        Ok(())
    }

    async fn pop(&self) -> Result<Option<SlotPair>, QueueError> {
        Ok(self.pairs.lock().await.pop_front())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.pairs.lock().await.len())
    }
}

/// Redis-list-backed slot pool.
pub struct RedisSlotQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisSlotQueue {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl SlotQueue for RedisSlotQueue {
    async fn push_batch(&self, pairs: &[SlotPair]) -> Result<(), QueueError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut encoded = Vec::with_capacity(pairs.len());
        for pair in pairs {
            encoded.push(serde_json::to_string(pair)?);
        }
        let _: i64 = conn.rpush(&self.key, encoded).await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<SlotPair>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lpop(&self.key, None).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let depth: usize = conn.llen(&self.key).await?;
        Ok(depth)
    }
}
