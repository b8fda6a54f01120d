//! Revocation: at-most-once, idempotent marking of an entry as revoked.
//!
//! Per entry the lifecycle is `Unclaimed -> Issued -> Revoked`; expiry is a
//! read-time interpretation of `exp` and never mutates the entry. A repeated
//! revoke returns the original timestamp instead of erroring or overwriting.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::common::error::Rejection;
use crate::common::responses::ApiResponse;

use super::audit::{AuditReporter, StatusListExtension};
use super::auth::{RequestAuthenticator, RevocationClaim};
use super::models::{RevocationResult, RevokeOutcome};
use super::store::EntryStore;

pub struct RevocationCoordinator {
    authenticator: Arc<RequestAuthenticator>,
    entries: Arc<dyn EntryStore>,
    audit: AuditReporter,
}

impl RevocationCoordinator {
    pub fn new(
        authenticator: Arc<RequestAuthenticator>,
        entries: Arc<dyn EntryStore>,
        audit: AuditReporter,
    ) -> Self {
        Self {
            authenticator,
            entries,
            audit,
        }
    }

    /// Entry point for a signed revocation request. Every outcome, success
    /// or failure, is reported to the audit sink and resolved to a response
    /// envelope.
    pub async fn revoke(&self, raw: &str) -> ApiResponse {
        match self.try_revoke(raw).await {
            Ok((claim, result)) => {
                self.audit
                    .index_revoked(
                        &claim.client.client_id,
                        StatusListExtension {
                            signing_key: Some(claim.signing_key.clone()),
                            key_id: Some(claim.key_id.clone()),
                            request: raw.to_string(),
                            index: Some(claim.idx),
                            uri: Some(claim.uri.clone()),
                            failure_reason: None,
                        },
                    )
                    .await;
                ApiResponse::revocation_success(result.already_revoked, result.revoked_at)
            }
            Err((client_id, rejection)) => {
                self.audit
                    .revocation_failed(client_id.as_deref(), raw, &rejection)
                    .await;
                rejection.into()
            }
        }
    }

    async fn try_revoke(
        &self,
        raw: &str,
    ) -> Result<(RevocationClaim, RevocationResult), (Option<String>, Rejection)> {
        let claim = self
            .authenticator
            .authenticate_revocation(raw)
            .await
            .map_err(|rejection| (None, rejection))?;

        let result = self
            .apply(&claim)
            .await
            .map_err(|rejection| (Some(claim.client.client_id.clone()), rejection))?;

        Ok((claim, result))
    }

    async fn apply(&self, claim: &RevocationClaim) -> Result<RevocationResult, Rejection> {
        // Idempotent replay: the entry read during validation already
        // carries the original timestamp, no mutation needed.
        if let Some(existing) = claim.entry.revoked_at {
            info!(
                uri = %claim.suffix,
                idx = claim.idx,
                "credential already revoked, returning original timestamp"
            );
            return Ok(RevocationResult {
                already_revoked: true,
                revoked_at: existing,
            });
        }

        let now = Utc::now().timestamp();
        match self.entries.revoke_once(&claim.suffix, claim.idx, now).await {
            Ok(Some(RevokeOutcome::Applied(revoked_at))) => {
                info!(uri = %claim.suffix, idx = claim.idx, "marked entry revoked");
                Ok(RevocationResult {
                    already_revoked: false,
                    revoked_at,
                })
            }
            // A concurrent revoke won the conditional write; this request
            // becomes a replay of it.
            Ok(Some(RevokeOutcome::AlreadyRevoked(revoked_at))) => Ok(RevocationResult {
                already_revoked: true,
                revoked_at,
            }),
            Ok(None) => Err(Rejection::NotFound(
                "Entry not found in status list table".to_string(),
            )),
            Err(e) => Err(Rejection::StoreFailure(format!(
                "Error updating revokedAt field: {e}"
            ))),
        }
    }
}
