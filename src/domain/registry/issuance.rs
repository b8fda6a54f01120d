//! Issuance: claims a pending slot from the pool and binds it to an
//! authenticated client.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::common::error::Rejection;
use crate::common::models::{ListType, SlotPair, StatusListEntry};
use crate::common::responses::ApiResponse;

use super::audit::{AuditReporter, StatusListExtension};
use super::auth::{IssuanceClaim, RequestAuthenticator};
use super::queue::SlotQueue;
use super::store::EntryStore;

pub struct IssuanceCoordinator {
    authenticator: Arc<RequestAuthenticator>,
    entries: Arc<dyn EntryStore>,
    bitstring_queue: Arc<dyn SlotQueue>,
    token_queue: Arc<dyn SlotQueue>,
    audit: AuditReporter,
    max_claim_attempts: u32,
}

impl IssuanceCoordinator {
    pub fn new(
        authenticator: Arc<RequestAuthenticator>,
        entries: Arc<dyn EntryStore>,
        bitstring_queue: Arc<dyn SlotQueue>,
        token_queue: Arc<dyn SlotQueue>,
        audit: AuditReporter,
        max_claim_attempts: u32,
    ) -> Self {
        Self {
            authenticator,
            entries,
            bitstring_queue,
            token_queue,
            audit,
            max_claim_attempts,
        }
    }

    /// Entry point for a signed issuance request. Every outcome, success or
    /// failure, is reported to the audit sink and resolved to a response
    /// envelope.
    pub async fn issue(&self, raw: &str) -> ApiResponse {
        match self.try_issue(raw).await {
            Ok((claim, slot)) => {
                self.audit
                    .index_issued(
                        &claim.client.client_id,
                        StatusListExtension {
                            signing_key: Some(claim.signing_key.clone()),
                            key_id: Some(claim.key_id.clone()),
                            request: raw.to_string(),
                            index: Some(slot.idx),
                            uri: Some(slot.uri.clone()),
                            failure_reason: None,
                        },
                    )
                    .await;
                ApiResponse::issuance_success(slot.idx, &slot.uri)
            }
            Err((client_id, rejection)) => {
                self.audit
                    .issuance_failed(client_id.as_deref(), raw, &rejection)
                    .await;
                rejection.into()
            }
        }
    }

    async fn try_issue(
        &self,
        raw: &str,
    ) -> Result<(IssuanceClaim, SlotPair), (Option<String>, Rejection)> {
        let claim = self
            .authenticator
            .authenticate_issuance(raw)
            .await
            .map_err(|rejection| (None, rejection))?;

        let slot = self
            .claim_slot(&claim)
            .await
            .map_err(|rejection| (Some(claim.client.client_id.clone()), rejection))?;

        Ok((claim, slot))
    }

    /// Pulls slots from the client's pool until one binds. A slot whose key
    /// is already taken (at-least-once delivery, or a lost race) is
    /// discarded and a fresh one drawn, up to the attempt limit.
    async fn claim_slot(&self, claim: &IssuanceClaim) -> Result<SlotPair, Rejection> {
        let queue = match claim.client.status_list.list_type {
            ListType::BitstringStatusList => &self.bitstring_queue,
            ListType::TokenStatusList => &self.token_queue,
        };

        for attempt in 1..=self.max_claim_attempts {
            let slot = queue
                .pop()
                .await
                .map_err(|e| Rejection::StoreFailure(format!("Error receiving messages: {e}")))?
                .ok_or_else(|| {
                    Rejection::StoreFailure("No messages received from slot pool".to_string())
                })?;

            let suffix = slot.uri.rsplit('/').next().unwrap_or(&slot.uri);
            let entry = StatusListEntry {
                uri: suffix.to_string(),
                idx: slot.idx,
                client_id: claim.client.client_id.clone(),
                issuer: claim.client.client_name.clone(),
                issued_at: Utc::now().timestamp(),
                exp: claim.expires,
                list_type: claim.client.status_list.list_type,
                revoked_at: None,
            };

            let created = self
                .entries
                .create_if_absent(entry)
                .await
                .map_err(|e| Rejection::StoreFailure(format!("Error adding credential: {e}")))?;

            if created {
                info!(
                    client_id = %claim.client.client_id,
                    uri = %slot.uri,
                    idx = slot.idx,
                    "issued status list entry"
                );
                return Ok(slot);
            }

            // The pool delivers at least once, so a taken index is a retry
            // condition, not a client error.
            warn!(attempt, uri = %slot.uri, idx = slot.idx, "slot already bound, drawing another");
        }

        Err(Rejection::StoreFailure(
            "could not claim an unused slot from the pool".to_string(),
        ))
    }
}
