//! Audit events: every issuance/revocation outcome is reported to an audit
//! sink as a side effect of the operation.
//!
//! A failed emission never fails the primary request; it is logged under its
//! own message so delivery failures stay distinguishable from operation
//! failures.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::common::error::Rejection;

use super::auth::jws::Jwk;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to encode audit event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditEventName {
    #[serde(rename = "CRS_INDEX_ISSUED")]
    IndexIssued,
    #[serde(rename = "CRS_ISSUANCE_FAILED")]
    IssuanceFailed,
    #[serde(rename = "CRS_INDEX_REVOKED")]
    IndexRevoked,
    #[serde(rename = "CRS_INDEX_REVOCATION_FAILED")]
    RevocationFailed,
}

/// Status-list details attached to every audit event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusListExtension {
    #[serde(rename = "signingKey", skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<Jwk>,
    #[serde(rename = "keyId", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// The raw signed request as received.
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(rename = "failure_reason", skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub timestamp: i64,
    pub event_timestamp_ms: i64,
    pub event_name: AuditEventName,
    pub component_id: String,
    pub extensions: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extensions {
    pub status_list: StatusListExtension,
}

/// Abstract interface for the audit event transport.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Builds and emits audit events for the coordinators.
#[derive(Clone)]
pub struct AuditReporter {
    sink: Arc<dyn AuditSink>,
    component_id: String,
}

impl AuditReporter {
    pub fn new(sink: Arc<dyn AuditSink>, component_id: impl Into<String>) -> Self {
        Self {
            sink,
            component_id: component_id.into(),
        }
    }

    pub async fn index_issued(
        &self,
        client_id: &str,
        extension: StatusListExtension,
    ) {
        self.emit(AuditEventName::IndexIssued, Some(client_id), extension)
            .await;
    }

    pub async fn issuance_failed(
        &self,
        client_id: Option<&str>,
        request: &str,
        rejection: &Rejection,
    ) {
        self.emit(
            AuditEventName::IssuanceFailed,
            client_id,
            failure_extension(request, rejection),
        )
        .await;
    }

    pub async fn index_revoked(&self, client_id: &str, extension: StatusListExtension) {
        self.emit(AuditEventName::IndexRevoked, Some(client_id), extension)
            .await;
    }

    pub async fn revocation_failed(
        &self,
        client_id: Option<&str>,
        request: &str,
        rejection: &Rejection,
    ) {
        self.emit(
            AuditEventName::RevocationFailed,
            client_id,
            failure_extension(request, rejection),
        )
        .await;
    }

    async fn emit(
        &self,
        event_name: AuditEventName,
        client_id: Option<&str>,
        extension: StatusListExtension,
    ) {
        let now = Utc::now();
        let event = AuditEvent {
            client_id: client_id.map(str::to_string),
            timestamp: now.timestamp(),
            event_timestamp_ms: now.timestamp_millis(),
            event_name,
            component_id: self.component_id.clone(),
            extensions: Extensions {
                status_list: extension,
            },
        };

        // The primary operation has already been decided; delivery failure
        // must stay visible without failing the request.
        if let Err(e) = self.sink.emit(event).await {
            error!("failed to send audit event to sink: {e}");
        }
    }
}

fn failure_extension(request: &str, rejection: &Rejection) -> StatusListExtension {
    StatusListExtension {
        request: request.to_string(),
        failure_reason: Some(serde_json::json!({
            "error": rejection.code(),
            "error_description": rejection.to_string(),
        })),
        ..Default::default()
    }
}

/// Emits audit events to the process log.
#[derive(Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        let encoded = serde_json::to_string(&event)?;
        info!(target: "audit", "{encoded}");
        Ok(())
    }
}

/// Queue-backed audit sink.
pub struct RedisAuditSink {
    conn: ConnectionManager,
    key: String,
}

impl RedisAuditSink {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl AuditSink for RedisAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&event)?;
        let _: i64 = conn.rpush(&self.key, encoded).await?;
        Ok(())
    }
}

/// Collects events in memory, for tests.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: tokio::sync::Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
