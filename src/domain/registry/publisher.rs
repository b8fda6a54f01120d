//! Rebuilds, signs and publishes one status-list document per list URI.
//!
//! Each list is a packed array of 2-bit statuses sized to the endpoint's
//! configured capacity. Unset indices read as valid; a revoked entry sets its
//! index to the invalid status. The packed array is compressed (gzip for
//! Bitstring lists, zlib for Token lists), base64-encoded, embedded in the
//! list-type-specific payload and signed by the external signing service.

use std::io::{Read as _, Write as _};
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{TimeDelta, Utc};
use flate2::{
    Compression,
    read::{GzDecoder, ZlibDecoder},
    write::{GzEncoder, ZlibEncoder},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::common::models::ListType;

use super::auth::jws::{self, ES256, JwsError};
use super::documents::{DocumentError, DocumentStore};
use super::signer::{SigningError, SigningService};
use super::sources::{ListConfigSource, SourceError};
use super::store::{EntryStore, StoreError};

/// 100,000 2-bit statuses per list unless the configuration says otherwise.
pub const DEFAULT_LIST_CAPACITY: u32 = 100_000;

/// Lifetime of a published document, seconds.
const DOCUMENT_TTL_SECS: i64 = 43_200;

const STATUS_INVALID: u8 = 0b01;

const STATUSES_PER_BYTE: usize = 4;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no revoked entries found for uri: {0}")]
    NoRevokedEntries(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("signing service timed out")]
    SigningTimeout,
    #[error(transparent)]
    Jws(#[from] JwsError),
    #[error("signed document failed verification against the service public key")]
    SignatureMismatch,
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),
    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

fn status_shift(list_type: ListType, idx: usize) -> u8 {
    // Bitstring lists fill each byte from the low bits; Token lists from the
    // high bits.
    match list_type {
        ListType::BitstringStatusList => ((idx % STATUSES_PER_BYTE) * 2) as u8,
        ListType::TokenStatusList => ((3 - idx % STATUSES_PER_BYTE) * 2) as u8,
    }
}

/// Sets the `idx`-th 2-bit status in `packed` to `status`.
pub fn set_status(packed: &mut [u8], idx: usize, status: u8, list_type: ListType) {
    let byte = idx / STATUSES_PER_BYTE;
    let shift = status_shift(list_type, idx);
    packed[byte] = packed[byte] & !(0b11 << shift) | ((status & 0b11) << shift);
}

/// Reads the `idx`-th 2-bit status from `packed`.
pub fn get_status(packed: &[u8], idx: usize, list_type: ListType) -> u8 {
    let byte = idx / STATUSES_PER_BYTE;
    let shift = status_shift(list_type, idx);
    (packed[byte] >> shift) & 0b11
}

/// Compresses the packed array with the list type's algorithm and
/// base64-encodes the result.
pub fn compress_and_encode(packed: &[u8], list_type: ListType) -> Result<String, PublishError> {
    let compressed = match list_type {
        ListType::BitstringStatusList => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(packed)?;
            encoder.finish()?
        }
        ListType::TokenStatusList => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(packed)?;
            encoder.finish()?
        }
    };
    Ok(BASE64_STANDARD.encode(compressed))
}

/// Reverses [`compress_and_encode`].
pub fn decode_and_decompress(encoded: &str, list_type: ListType) -> Result<Vec<u8>, PublishError> {
    let compressed = BASE64_STANDARD.decode(encoded)?;
    let mut packed = Vec::new();
    match list_type {
        ListType::BitstringStatusList => {
            GzDecoder::new(compressed.as_slice()).read_to_end(&mut packed)?;
        }
        ListType::TokenStatusList => {
            ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut packed)?;
        }
    }
    Ok(packed)
}

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BitstringSubject {
    id: String,
    #[serde(rename = "type")]
    subject_type: &'static str,
    status_size: u8,
    status_purpose: &'static str,
    status_message: Vec<StatusMessage>,
    encoded_list: String,
}

/// The verifiable-credential-shaped payload of a Bitstring list document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BitstringCredential {
    #[serde(rename = "@context")]
    context: Vec<&'static str>,
    id: String,
    #[serde(rename = "type")]
    credential_type: Vec<&'static str>,
    issuer: String,
    valid_from: String,
    valid_until: String,
    credential_subject: BitstringSubject,
}

#[derive(Debug, Serialize)]
struct TokenStatusList {
    bits: u8,
    lst: String,
}

/// The compact numeric-claims payload of a Token list document.
#[derive(Debug, Serialize)]
struct TokenStatusClaims {
    exp: i64,
    iat: i64,
    status_list: TokenStatusList,
    sub: String,
    ttl: i64,
}

pub struct ListPublisher {
    entries: Arc<dyn EntryStore>,
    lists: Arc<dyn ListConfigSource>,
    signer: Arc<dyn SigningService>,
    documents: Arc<dyn DocumentStore>,
    component_id: String,
    signing_timeout: Duration,
}

impl ListPublisher {
    pub fn new(
        entries: Arc<dyn EntryStore>,
        lists: Arc<dyn ListConfigSource>,
        signer: Arc<dyn SigningService>,
        documents: Arc<dyn DocumentStore>,
        component_id: impl Into<String>,
        signing_timeout: Duration,
    ) -> Self {
        Self {
            entries,
            lists,
            signer,
            documents,
            component_id: component_id.into(),
            signing_timeout,
        }
    }

    /// Rebuilds and publishes the document for one list. Any failure is
    /// surfaced to the caller, which relies on the upstream delivery
    /// mechanism's redelivery policy instead of retrying here.
    pub async fn publish(&self, suffix: &str) -> Result<String, PublishError> {
        let revoked = self.entries.revoked_for_uri(suffix).await?;
        let Some(first) = revoked.first() else {
            return Err(PublishError::NoRevokedEntries(suffix.to_string()));
        };
        let list_type = first.list_type;

        let config = self.lists.load().await?;
        let capacity = config
            .capacity_for_suffix(suffix)
            .unwrap_or(DEFAULT_LIST_CAPACITY) as usize;

        let mut packed = vec![0u8; capacity.div_ceil(STATUSES_PER_BYTE)];
        for entry in &revoked {
            if entry.idx as usize >= capacity {
                warn!(
                    uri = %suffix,
                    idx = entry.idx,
                    capacity,
                    "revoked index exceeds list capacity, skipping"
                );
                continue;
            }
            set_status(&mut packed, entry.idx as usize, STATUS_INVALID, list_type);
        }

        let encoded_list = compress_and_encode(&packed, list_type)?;

        let token = match list_type {
            ListType::BitstringStatusList => {
                let payload = self.bitstring_payload(suffix, encoded_list);
                self.sign_document(&payload).await?
            }
            ListType::TokenStatusList => {
                let payload = self.token_payload(suffix, encoded_list);
                self.sign_document(&payload).await?
            }
        };

        let key = format!("{}/{suffix}", list_type.indicator());
        self.documents.put(&key, "application/jwt", &token).await?;

        info!(uri = %suffix, %list_type, revoked = revoked.len(), "published status list document");
        Ok(token)
    }

    fn bitstring_payload(&self, suffix: &str, encoded_list: String) -> BitstringCredential {
        let id = format!("{}/b/{suffix}", self.component_id);
        let valid_from = Utc::now();
        let valid_until = valid_from + TimeDelta::seconds(DOCUMENT_TTL_SECS);

        BitstringCredential {
            context: vec!["https://www.w3.org/ns/credentials/v2"],
            id: id.clone(),
            credential_type: vec!["VerifiableCredential", "BitstringStatusListCredential"],
            issuer: self.component_id.clone(),
            valid_from: valid_from.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            valid_until: valid_until.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            credential_subject: BitstringSubject {
                id,
                subject_type: "BitstringStatusList",
                status_size: 2,
                status_purpose: "message",
                status_message: vec![
                    StatusMessage {
                        status: "0x0",
                        message: "VALID",
                    },
                    StatusMessage {
                        status: "0x1",
                        message: "INVALID",
                    },
                ],
                encoded_list,
            },
        }
    }

    fn token_payload(&self, suffix: &str, lst: String) -> TokenStatusClaims {
        let iat = Utc::now().timestamp();
        TokenStatusClaims {
            exp: iat + DOCUMENT_TTL_SECS,
            iat,
            status_list: TokenStatusList { bits: 2, lst },
            sub: format!("{}/t/{suffix}", self.component_id),
            ttl: DOCUMENT_TTL_SECS,
        }
    }

    /// Signs the payload as a compact token and verifies the result against
    /// the signing service's public key before it can be published.
    async fn sign_document<T: Serialize>(&self, payload: &T) -> Result<String, PublishError> {
        let header = json!({
            "alg": ES256,
            "typ": "JWT",
            "kid": self.signer.key_id(),
        });
        let signing_input = format!(
            "{}.{}",
            jws::base64_url_encode(header.to_string()),
            jws::base64_url_encode(serde_json::to_string(payload)?)
        );

        let der = tokio::time::timeout(
            self.signing_timeout,
            self.signer.sign(signing_input.as_bytes()),
        )
        .await
        .map_err(|_| PublishError::SigningTimeout)??;

        // The token format requires the fixed-length R||S form, not DER.
        let raw = jws::der_signature_to_raw(&der)?;

        let spki = tokio::time::timeout(self.signing_timeout, self.signer.public_key_der())
            .await
            .map_err(|_| PublishError::SigningTimeout)??;
        if !jws::verify_es256_spki(signing_input.as_bytes(), &raw, &spki)? {
            return Err(PublishError::SignatureMismatch);
        }

        Ok(format!("{signing_input}.{}", jws::base64_url_encode(raw)))
    }
}
