//! Status-list entry storage.
//!
//! The store is the only mutable shared resource: every mutation of a
//! `(uri, idx)` key is conditional (create-if-absent for claims, set-once for
//! revocations), so no locking beyond the backend's native conditional-write
//! support is needed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::common::models::{ListType, StatusListEntry};
use crate::domain::registry::models::{ChangeEvent, ChangeKind, RevokeOutcome};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("stored entry is corrupt: {0}")]
    Corrupt(String),
}

/// Abstract interface for the keyed store of status-list entries.
///
/// Entries are keyed by `(uri, idx)` where `uri` is the list identifier
/// suffix. All writes are conditional: a key is never rebound while live,
/// and `revokedAt` is set at most once.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Retrieve one entry by key.
    async fn get(&self, uri: &str, idx: u32) -> Result<Option<StatusListEntry>, StoreError>;

    /// Write `entry` only if its `(uri, idx)` key is vacant. Returns whether
    /// the write happened.
    async fn create_if_absent(&self, entry: StatusListEntry) -> Result<bool, StoreError>;

    /// Set `revokedAt = at` only if it is unset. Returns `None` when no
    /// entry exists at the key.
    async fn revoke_once(
        &self,
        uri: &str,
        idx: u32,
        at: i64,
    ) -> Result<Option<RevokeOutcome>, StoreError>;

    /// Remove an entry (expiry cleanup). Returns whether one was removed.
    async fn remove(&self, uri: &str, idx: u32) -> Result<bool, StoreError>;

    /// All revoked entries of one list, ordered by index.
    async fn revoked_for_uri(&self, uri: &str) -> Result<Vec<StatusListEntry>, StoreError>;
}

/// Represents an in-memory entry store, used in tests and local runs.
#[derive(Default)]
pub struct InMemoryEntryStore {
    entries: DashMap<(String, u32), StatusListEntry>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn get(&self, uri: &str, idx: u32) -> Result<Option<StatusListEntry>, StoreError> {
        Ok(self
            .entries
            .get(&(uri.to_string(), idx))
            .map(|e| e.value().clone()))
    }

    async fn create_if_absent(&self, entry: StatusListEntry) -> Result<bool, StoreError> {
        let key = (entry.uri.clone(), entry.idx);
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn revoke_once(
        &self,
        uri: &str,
        idx: u32,
        at: i64,
    ) -> Result<Option<RevokeOutcome>, StoreError> {
        let Some(mut entry) = self.entries.get_mut(&(uri.to_string(), idx)) else {
            return Ok(None);
        };
        match entry.revoked_at {
            Some(existing) => Ok(Some(RevokeOutcome::AlreadyRevoked(existing))),
            None => {
                entry.revoked_at = Some(at);
                Ok(Some(RevokeOutcome::Applied(at)))
            }
        }
    }

    async fn remove(&self, uri: &str, idx: u32) -> Result<bool, StoreError> {
        Ok(self.entries.remove(&(uri.to_string(), idx)).is_some())
    }

    async fn revoked_for_uri(&self, uri: &str) -> Result<Vec<StatusListEntry>, StoreError> {
        let mut revoked: Vec<StatusListEntry> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == uri && e.value().revoked_at.is_some())
            .map(|e| e.value().clone())
            .collect();
        revoked.sort_by_key(|e| e.idx);
        Ok(revoked)
    }
}

/// Redis-based entry store.
///
/// Each entry is a hash at `statuslist:entry:{uri}:{idx}`; the indices of a
/// list are tracked in a set at `statuslist:index:{uri}` so the publisher can
/// read a whole list without scanning.
pub struct RedisEntryStore {
    conn: ConnectionManager,
    create_script: Script,
    revoke_script: Script,
}

fn entry_key(uri: &str, idx: u32) -> String {
    format!("statuslist:entry:{uri}:{idx}")
}

fn index_key(uri: &str) -> String {
    format!("statuslist:index:{uri}")
}

impl RedisEntryStore {
    pub fn new(conn: ConnectionManager) -> Self {
        // Entry creation and the index-set insert must be atomic with the
        // vacancy check.
        let create_script = Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 1 then
                return 0
            end
            redis.call('HSET', KEYS[1],
                'uri', ARGV[1], 'idx', ARGV[2], 'clientId', ARGV[3],
                'issuer', ARGV[4], 'issuedAt', ARGV[5], 'exp', ARGV[6],
                'listType', ARGV[7])
            redis.call('SADD', KEYS[2], ARGV[2])
            return 1
            "#,
        );
        // revokedAt is set at most once; the original value always wins.
        let revoke_script = Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 0 then
                return {-1, 0}
            end
            local existing = redis.call('HGET', KEYS[1], 'revokedAt')
            if existing then
                return {0, tonumber(existing)}
            end
            redis.call('HSET', KEYS[1], 'revokedAt', ARGV[1])
            return {1, tonumber(ARGV[1])}
            "#,
        );
        Self {
            conn,
            create_script,
            revoke_script,
        }
    }
}

fn entry_from_hash(fields: HashMap<String, String>) -> Result<StatusListEntry, StoreError> {
    fn required<'a>(
        fields: &'a HashMap<String, String>,
        name: &str,
    ) -> Result<&'a str, StoreError> {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| StoreError::Corrupt(format!("missing field {name}")))
    }
    fn parsed<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, StoreError> {
        raw.parse()
            .map_err(|_| StoreError::Corrupt(format!("unparseable field {name}: {raw}")))
    }

    let list_type: ListType = parsed(required(&fields, "listType")?, "listType")?;
    Ok(StatusListEntry {
        uri: required(&fields, "uri")?.to_string(),
        idx: parsed(required(&fields, "idx")?, "idx")?,
        client_id: required(&fields, "clientId")?.to_string(),
        issuer: required(&fields, "issuer")?.to_string(),
        issued_at: parsed(required(&fields, "issuedAt")?, "issuedAt")?,
        exp: parsed(required(&fields, "exp")?, "exp")?,
        list_type,
        revoked_at: fields
            .get("revokedAt")
            .map(|raw| parsed(raw, "revokedAt"))
            .transpose()?,
    })
}

#[async_trait]
impl EntryStore for RedisEntryStore {
    async fn get(&self, uri: &str, idx: u32) -> Result<Option<StatusListEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(entry_key(uri, idx)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        entry_from_hash(fields).map(Some)
    }

    async fn create_if_absent(&self, entry: StatusListEntry) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let created: i64 = self
            .create_script
            .key(entry_key(&entry.uri, entry.idx))
            .key(index_key(&entry.uri))
            .arg(&entry.uri)
            .arg(entry.idx)
            .arg(&entry.client_id)
            .arg(&entry.issuer)
            .arg(entry.issued_at)
            .arg(entry.exp)
            .arg(entry.list_type.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(created == 1)
    }

    async fn revoke_once(
        &self,
        uri: &str,
        idx: u32,
        at: i64,
    ) -> Result<Option<RevokeOutcome>, StoreError> {
        let mut conn = self.conn.clone();
        let (state, timestamp): (i64, i64) = self
            .revoke_script
            .key(entry_key(uri, idx))
            .arg(at)
            .invoke_async(&mut conn)
            .await?;
        match state {
            -1 => Ok(None),
            0 => Ok(Some(RevokeOutcome::AlreadyRevoked(timestamp))),
            _ => Ok(Some(RevokeOutcome::Applied(timestamp))),
        }
    }

    async fn remove(&self, uri: &str, idx: u32) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(entry_key(uri, idx)).await?;
        let _: i64 = conn.srem(index_key(uri), idx).await?;
        Ok(removed > 0)
    }

    async fn revoked_for_uri(&self, uri: &str) -> Result<Vec<StatusListEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let mut indices: Vec<u32> = conn.smembers(index_key(uri)).await?;
        indices.sort_unstable();

        let mut revoked = Vec::new();
        for idx in indices {
            let fields: HashMap<String, String> = conn.hgetall(entry_key(uri, idx)).await?;
            if fields.is_empty() {
                continue;
            }
            let entry = entry_from_hash(fields)?;
            if entry.revoked_at.is_some() {
                revoked.push(entry);
            }
        }
        Ok(revoked)
    }
}

/// Decorator that emits a [`ChangeEvent`] after every successful mutation,
/// feeding the ordered republish pipeline. Reads pass straight through.
pub struct CapturingStore {
    inner: Arc<dyn EntryStore>,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

impl CapturingStore {
    pub fn new(inner: Arc<dyn EntryStore>, events: mpsc::UnboundedSender<ChangeEvent>) -> Self {
        Self { inner, events }
    }

    fn emit(&self, kind: ChangeKind, uri: &str, idx: u32) {
        let event = ChangeEvent {
            kind,
            uri: uri.to_string(),
            idx,
        };
        if self.events.send(event).is_err() {
            warn!(uri, idx, "change-capture receiver is gone, event dropped");
        }
    }
}

#[async_trait]
impl EntryStore for CapturingStore {
    async fn get(&self, uri: &str, idx: u32) -> Result<Option<StatusListEntry>, StoreError> {
        self.inner.get(uri, idx).await
    }

    async fn create_if_absent(&self, entry: StatusListEntry) -> Result<bool, StoreError> {
        let uri = entry.uri.clone();
        let idx = entry.idx;
        let created = self.inner.create_if_absent(entry).await?;
        if created {
            self.emit(ChangeKind::Insert, &uri, idx);
        }
        Ok(created)
    }

    async fn revoke_once(
        &self,
        uri: &str,
        idx: u32,
        at: i64,
    ) -> Result<Option<RevokeOutcome>, StoreError> {
        let outcome = self.inner.revoke_once(uri, idx, at).await?;
        if let Some(RevokeOutcome::Applied(_)) = outcome {
            self.emit(ChangeKind::Modify, uri, idx);
        }
        Ok(outcome)
    }

    async fn remove(&self, uri: &str, idx: u32) -> Result<bool, StoreError> {
        let removed = self.inner.remove(uri, idx).await?;
        if removed {
            self.emit(ChangeKind::Remove, uri, idx);
        }
        Ok(removed)
    }

    async fn revoked_for_uri(&self, uri: &str) -> Result<Vec<StatusListEntry>, StoreError> {
        self.inner.revoked_for_uri(uri).await
    }
}
