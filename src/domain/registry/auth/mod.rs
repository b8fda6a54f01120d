//! Request authentication: turns an untrusted signed token into a verified
//! claim, or a classified rejection.
//!
//! Every failure point maps to exactly one [`Rejection`]; illegal
//! combinations (a "valid" result carrying an error) are unrepresentable.

pub mod jws;
pub mod keyset;

use std::sync::Arc;

use tracing::{debug, error};

use crate::common::error::Rejection;
use crate::common::models::{ClientEntry, ListType, StatusListEntry};

use super::sources::ClientRegistrySource;
use super::store::EntryStore;
use jws::{CompactToken, ES256, Jwk, JwsError};
use keyset::{KeySetError, KeySetFetcher};

/// A verified issuance request. Constructed per request, never persisted.
#[derive(Debug, Clone)]
pub struct IssuanceClaim {
    pub client: ClientEntry,
    /// Advisory expiry for the entry, from the request's `expires` claim.
    pub expires: i64,
    pub key_id: String,
    pub signing_key: Jwk,
}

/// A verified revocation request, including the entry it targets.
#[derive(Debug, Clone)]
pub struct RevocationClaim {
    pub client: ClientEntry,
    pub idx: u32,
    pub issued_at: i64,
    /// The target URI exactly as sent.
    pub uri: String,
    /// List identifier suffix parsed from the target URI.
    pub suffix: String,
    /// List type derived from the URI's one-character indicator.
    pub list_type: ListType,
    /// The existing entry, ownership- and type-checked.
    pub entry: StatusListEntry,
    pub key_id: String,
    pub signing_key: Jwk,
}

pub struct RequestAuthenticator {
    clients: Arc<dyn ClientRegistrySource>,
    key_sets: Arc<dyn KeySetFetcher>,
    entries: Arc<dyn EntryStore>,
}

impl RequestAuthenticator {
    pub fn new(
        clients: Arc<dyn ClientRegistrySource>,
        key_sets: Arc<dyn KeySetFetcher>,
        entries: Arc<dyn EntryStore>,
    ) -> Self {
        Self {
            clients,
            key_sets,
            entries,
        }
    }

    pub async fn authenticate_issuance(&self, raw: &str) -> Result<IssuanceClaim, Rejection> {
        let token = decode(raw)?;

        let expires = token
            .payload_i64("expires")
            .ok_or_else(|| Rejection::MalformedRequest("No Expiry Date in Payload".to_string()))?;

        let (client, key_id, signing_key) = self.verify_common(&token).await?;
        debug!(client_id = %client.client_id, "issuance request verified");

        Ok(IssuanceClaim {
            client,
            expires,
            key_id,
            signing_key,
        })
    }

    pub async fn authenticate_revocation(&self, raw: &str) -> Result<RevocationClaim, Rejection> {
        let token = decode(raw)?;

        let idx = token
            .payload_u32("idx")
            .ok_or_else(|| Rejection::MalformedRequest("No Index in Payload".to_string()))?;
        let issued_at = token
            .payload_i64("iat")
            .ok_or_else(|| Rejection::MalformedRequest("No Issued At in Payload".to_string()))?;
        let uri = token
            .payload_str("uri")
            .ok_or_else(|| Rejection::MalformedRequest("No URI in Payload".to_string()))?
            .to_string();

        let (client, key_id, signing_key) = self.verify_common(&token).await?;

        // The target URI ends .../{b|t}/{suffix}.
        let mut segments = uri.rsplit('/');
        let suffix = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(invalid_uri_format)?
            .to_string();
        let indicator = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(invalid_uri_format)?;
        let list_type = ListType::from_indicator(indicator).ok_or_else(|| {
            Rejection::MalformedRequest("Invalid list type in URI: must be /t/ or /b/".to_string())
        })?;

        let entry = self
            .entries
            .get(&suffix, idx)
            .await
            .map_err(|e| Rejection::StoreFailure(format!("Error querying database: {e}")))?
            .ok_or_else(|| {
                Rejection::NotFound("Entry not found in status list table".to_string())
            })?;

        // A wrong list type reads as not-found so an unauthenticated probe
        // cannot distinguish "wrong type" from "does not exist".
        if entry.list_type != list_type {
            return Err(Rejection::NotFound(format!(
                "List type mismatch: Expected {} but entry has {}",
                list_type, entry.list_type
            )));
        }

        if entry.client_id != client.client_id {
            error!(
                client_id = %client.client_id,
                "the original credential clientId is different to the clientId in the request"
            );
            return Err(Rejection::Unauthorized);
        }

        debug!(client_id = %client.client_id, %suffix, idx, "revocation request verified");

        Ok(RevocationClaim {
            client,
            idx,
            issued_at,
            uri,
            suffix,
            list_type,
            entry,
            key_id,
            signing_key,
        })
    }

    /// Steps shared by both operations: locate the key id and issuer, resolve
    /// the client, fetch its key set, and verify the signature.
    async fn verify_common(
        &self,
        token: &CompactToken,
    ) -> Result<(ClientEntry, String, Jwk), Rejection> {
        let key_id = token
            .header_str("kid")
            .ok_or_else(|| Rejection::MalformedRequest("No Kid in Header".to_string()))?
            .to_string();
        let issuer = token
            .payload_str("iss")
            .ok_or_else(|| Rejection::MalformedRequest("No Issuer in Payload".to_string()))?
            .to_string();

        let registry = self.clients.load().await.map_err(|e| {
            Rejection::ServerMisconfiguration(format!("Error loading client registry: {e}"))
        })?;
        let client = registry
            .find(&issuer)
            .cloned()
            .ok_or_else(|| Rejection::UnknownClient(issuer.clone()))?;

        let jwks_uri = client.status_list.jwks_uri.clone();
        if jwks_uri.is_empty() {
            return Err(Rejection::ServerMisconfiguration(format!(
                "No jwksUri found on client ID: {}",
                client.client_id
            )));
        }

        let key_set = self.key_sets.fetch(&jwks_uri).await.map_err(|e| match e {
            KeySetError::Parse(_) => Rejection::ServerMisconfiguration(e.to_string()),
            other => Rejection::UpstreamUnavailable(other.to_string()),
        })?;

        let signing_key = key_set
            .find(&key_id)
            .cloned()
            .ok_or_else(|| Rejection::UnknownKey(key_id.clone()))?;

        if token.header_str("alg").is_some_and(|alg| alg != ES256) {
            return Err(Rejection::InvalidSignature);
        }

        match jws::verify_es256(token.signing_input(), token.signature(), &signing_key) {
            Ok(true) => Ok((client, key_id, signing_key)),
            Ok(false) => Err(Rejection::InvalidSignature),
            // A key that cannot be imported behaves like a key that was
            // never found.
            Err(JwsError::UnsupportedKey(_)) => Err(Rejection::UnknownKey(key_id)),
            Err(e) => {
                debug!("signature verification failed: {e}");
                Err(Rejection::InvalidSignature)
            }
        }
    }
}

fn invalid_uri_format() -> Rejection {
    Rejection::MalformedRequest("Invalid URI format".to_string())
}

fn decode(raw: &str) -> Result<CompactToken, Rejection> {
    if raw.trim().is_empty() {
        return Err(Rejection::MalformedRequest(
            "No Request Body Found".to_string(),
        ));
    }
    CompactToken::decode(raw)
        .map_err(|_| Rejection::MalformedRequest("Error decoding JWT".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::{ClientRegistry, ClientStatusList};
    use crate::domain::registry::signer::LocalSigner;
    use crate::domain::registry::sources::StaticClientRegistry;
    use crate::domain::registry::store::InMemoryEntryStore;
    use jws::JsonWebKeySet;
    use keyset::StaticKeySets;
    use serde_json::{Value, json};

    const JWKS_URI: &str = "https://issuer.example.test/.well-known/jwks.json";
    const CLIENT_ID: &str = "asKWnsjeEJEWjjwSHsIksIksIhBe";
    const KID: &str = "test-kid";

    fn client(list_type: ListType) -> ClientEntry {
        ClientEntry {
            client_name: "OVA".to_string(),
            client_id: CLIENT_ID.to_string(),
            status_list: ClientStatusList {
                jwks_uri: JWKS_URI.to_string(),
                list_type,
                format: "vc+jwt".to_string(),
            },
        }
    }

    struct Fixture {
        signer: LocalSigner,
        authenticator: RequestAuthenticator,
        entries: Arc<InMemoryEntryStore>,
    }

    fn fixture(list_type: ListType) -> Fixture {
        let signer = LocalSigner::generate(KID.to_string()).unwrap();
        let key_set = JsonWebKeySet {
            keys: vec![signer.public_jwk().unwrap()],
        };
        let entries = Arc::new(InMemoryEntryStore::new());
        let authenticator = RequestAuthenticator::new(
            Arc::new(StaticClientRegistry(ClientRegistry {
                clients: vec![client(list_type)],
            })),
            Arc::new(StaticKeySets::new().with(JWKS_URI, key_set)),
            entries.clone(),
        );
        Fixture {
            signer,
            authenticator,
            entries,
        }
    }

    fn token(fixture: &Fixture, payload: Value) -> String {
        fixture
            .signer
            .sign_compact(&json!({"alg": "ES256", "typ": "JWT", "kid": KID}), &payload)
            .unwrap()
    }

    fn entry(suffix: &str, idx: u32, list_type: ListType) -> StatusListEntry {
        StatusListEntry {
            uri: suffix.to_string(),
            idx,
            client_id: CLIENT_ID.to_string(),
            issuer: "OVA".to_string(),
            issued_at: 1_700_000_000,
            exp: 1_900_000_000,
            list_type,
            revoked_at: None,
        }
    }

    fn revocation_payload(uri: &str) -> Value {
        json!({"iss": CLIENT_ID, "idx": 123, "iat": 1_700_000_000, "uri": uri})
    }

    #[tokio::test]
    async fn issuance_happy_path() {
        let f = fixture(ListType::BitstringStatusList);
        let raw = token(&f, json!({"iss": CLIENT_ID, "expires": 1_900_000_000}));

        let claim = f.authenticator.authenticate_issuance(&raw).await.unwrap();
        assert_eq!(claim.client.client_id, CLIENT_ID);
        assert_eq!(claim.expires, 1_900_000_000);
        assert_eq!(claim.key_id, KID);
    }

    #[tokio::test]
    async fn issuance_missing_fields_are_named() {
        let f = fixture(ListType::BitstringStatusList);

        let raw = token(&f, json!({"iss": CLIENT_ID}));
        assert_eq!(
            f.authenticator.authenticate_issuance(&raw).await.unwrap_err(),
            Rejection::MalformedRequest("No Expiry Date in Payload".to_string())
        );

        let raw = token(&f, json!({"expires": 1_900_000_000}));
        assert_eq!(
            f.authenticator.authenticate_issuance(&raw).await.unwrap_err(),
            Rejection::MalformedRequest("No Issuer in Payload".to_string())
        );

        let raw = f
            .signer
            .sign_compact(
                &json!({"alg": "ES256", "typ": "JWT"}),
                &json!({"iss": CLIENT_ID, "expires": 1_900_000_000}),
            )
            .unwrap();
        assert_eq!(
            f.authenticator.authenticate_issuance(&raw).await.unwrap_err(),
            Rejection::MalformedRequest("No Kid in Header".to_string())
        );
    }

    #[tokio::test]
    async fn garbage_and_empty_bodies_are_malformed() {
        let f = fixture(ListType::BitstringStatusList);

        assert_eq!(
            f.authenticator.authenticate_issuance("").await.unwrap_err(),
            Rejection::MalformedRequest("No Request Body Found".to_string())
        );
        assert_eq!(
            f.authenticator
                .authenticate_issuance("not-a-jwt")
                .await
                .unwrap_err(),
            Rejection::MalformedRequest("Error decoding JWT".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_client_is_rejected() {
        let f = fixture(ListType::BitstringStatusList);
        let raw = token(&f, json!({"iss": "stranger", "expires": 1_900_000_000}));

        assert_eq!(
            f.authenticator.authenticate_issuance(&raw).await.unwrap_err(),
            Rejection::UnknownClient("stranger".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_kid_is_rejected() {
        let f = fixture(ListType::BitstringStatusList);
        let raw = f
            .signer
            .sign_compact(
                &json!({"alg": "ES256", "typ": "JWT", "kid": "other-kid"}),
                &json!({"iss": CLIENT_ID, "expires": 1_900_000_000}),
            )
            .unwrap();

        assert_eq!(
            f.authenticator.authenticate_issuance(&raw).await.unwrap_err(),
            Rejection::UnknownKey("other-kid".to_string())
        );
    }

    #[tokio::test]
    async fn signature_from_wrong_key_is_rejected() {
        let f = fixture(ListType::BitstringStatusList);

        // Signed by a different key but presenting the registered kid.
        let impostor = LocalSigner::generate(KID.to_string()).unwrap();
        let raw = impostor
            .sign_compact(
                &json!({"alg": "ES256", "typ": "JWT", "kid": KID}),
                &json!({"iss": CLIENT_ID, "expires": 1_900_000_000}),
            )
            .unwrap();

        assert_eq!(
            f.authenticator.authenticate_issuance(&raw).await.unwrap_err(),
            Rejection::InvalidSignature
        );
    }

    #[tokio::test]
    async fn missing_jwks_uri_is_a_misconfiguration() {
        let signer = LocalSigner::generate(KID.to_string()).unwrap();
        let mut misconfigured = client(ListType::BitstringStatusList);
        misconfigured.status_list.jwks_uri = String::new();

        let authenticator = RequestAuthenticator::new(
            Arc::new(StaticClientRegistry(ClientRegistry {
                clients: vec![misconfigured],
            })),
            Arc::new(StaticKeySets::new()),
            Arc::new(InMemoryEntryStore::new()),
        );

        let raw = signer
            .sign_compact(
                &json!({"alg": "ES256", "typ": "JWT", "kid": KID}),
                &json!({"iss": CLIENT_ID, "expires": 1_900_000_000}),
            )
            .unwrap();

        assert_eq!(
            authenticator.authenticate_issuance(&raw).await.unwrap_err(),
            Rejection::ServerMisconfiguration(format!(
                "No jwksUri found on client ID: {CLIENT_ID}"
            ))
        );
    }

    #[tokio::test]
    async fn revocation_missing_fields_are_named() {
        let f = fixture(ListType::TokenStatusList);

        let cases = [
            (json!({"iss": CLIENT_ID, "iat": 1, "uri": "u"}), "No Index in Payload"),
            (json!({"iss": CLIENT_ID, "idx": 1, "uri": "u"}), "No Issued At in Payload"),
            (json!({"iss": CLIENT_ID, "idx": 1, "iat": 1}), "No URI in Payload"),
        ];
        for (payload, expected) in cases {
            let raw = token(&f, payload);
            assert_eq!(
                f.authenticator
                    .authenticate_revocation(&raw)
                    .await
                    .unwrap_err(),
                Rejection::MalformedRequest(expected.to_string())
            );
        }
    }

    #[tokio::test]
    async fn revocation_uri_parsing() {
        let f = fixture(ListType::TokenStatusList);

        let raw = token(&f, revocation_payload("no-slashes"));
        assert_eq!(
            f.authenticator
                .authenticate_revocation(&raw)
                .await
                .unwrap_err(),
            Rejection::MalformedRequest("Invalid URI format".to_string())
        );

        let raw = token(
            &f,
            revocation_payload("https://crs.example.test/x/SUFFIX"),
        );
        assert_eq!(
            f.authenticator
                .authenticate_revocation(&raw)
                .await
                .unwrap_err(),
            Rejection::MalformedRequest(
                "Invalid list type in URI: must be /t/ or /b/".to_string()
            )
        );
    }

    #[tokio::test]
    async fn revocation_missing_entry_is_not_found() {
        let f = fixture(ListType::TokenStatusList);
        let raw = token(&f, revocation_payload("https://crs.example.test/t/XYZ"));

        assert_eq!(
            f.authenticator
                .authenticate_revocation(&raw)
                .await
                .unwrap_err(),
            Rejection::NotFound("Entry not found in status list table".to_string())
        );
    }

    #[tokio::test]
    async fn revocation_list_type_mismatch_reads_as_not_found() {
        let f = fixture(ListType::TokenStatusList);
        f.entries
            .create_if_absent(entry("XYZ", 123, ListType::BitstringStatusList))
            .await
            .unwrap();

        let raw = token(&f, revocation_payload("https://crs.example.test/t/XYZ"));
        assert_eq!(
            f.authenticator
                .authenticate_revocation(&raw)
                .await
                .unwrap_err(),
            Rejection::NotFound(
                "List type mismatch: Expected TokenStatusList but entry has BitstringStatusList"
                    .to_string()
            )
        );
    }

    #[tokio::test]
    async fn revocation_foreign_entry_is_unauthorized() {
        let f = fixture(ListType::TokenStatusList);
        let mut foreign = entry("XYZ", 123, ListType::TokenStatusList);
        foreign.client_id = "somebody-else".to_string();
        f.entries.create_if_absent(foreign).await.unwrap();

        let raw = token(&f, revocation_payload("https://crs.example.test/t/XYZ"));
        assert_eq!(
            f.authenticator
                .authenticate_revocation(&raw)
                .await
                .unwrap_err(),
            Rejection::Unauthorized
        );
    }

    #[tokio::test]
    async fn revocation_happy_path() {
        let f = fixture(ListType::TokenStatusList);
        f.entries
            .create_if_absent(entry("XYZ", 123, ListType::TokenStatusList))
            .await
            .unwrap();

        let raw = token(&f, revocation_payload("https://crs.example.test/t/XYZ"));
        let claim = f.authenticator.authenticate_revocation(&raw).await.unwrap();

        assert_eq!(claim.suffix, "XYZ");
        assert_eq!(claim.idx, 123);
        assert_eq!(claim.list_type, ListType::TokenStatusList);
        assert_eq!(claim.entry.client_id, CLIENT_ID);
    }
}
