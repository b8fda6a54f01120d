// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crs_server::common::models::{
    ClientEntry, ClientRegistry, ClientStatusList, ListConfiguration, ListEndpoint, ListType,
    StatusListEntry,
};
use crs_server::domain::registry::audit::InMemoryAuditSink;
use crs_server::domain::registry::auth::jws::{JsonWebKeySet, Jwk};
use crs_server::domain::registry::auth::keyset::StaticKeySets;
use crs_server::domain::registry::documents::{InMemoryDocumentStore, PublishedDocument};
use crs_server::domain::registry::queue::InMemorySlotQueue;
use crs_server::domain::registry::service::{RegistryDeps, RegistryService, RegistrySettings};
use crs_server::domain::registry::signer::LocalSigner;
use crs_server::domain::registry::sources::{StaticClientRegistry, StaticListConfiguration};
use crs_server::domain::registry::store::InMemoryEntryStore;
use serde_json::json;

pub const COMPONENT_ID: &str = "https://crs.example.test";
pub const JWKS_URI: &str = "https://issuer.example.test/.well-known/jwks.json";
pub const BITSTRING_CLIENT_ID: &str = "asKWnsjeEJEWjjwSHsIksIksIhBe";
pub const TOKEN_CLIENT_ID: &str = "DNkekdNSkekSNljrwevOIUPenGeS";
pub const KID: &str = "integration-kid";

pub struct TestRegistry {
    pub service: RegistryService,
    /// Signs client requests; its public key is the registered key set.
    pub client_signer: LocalSigner,
    /// Public key of the document signing service.
    pub document_signer_jwk: Jwk,
    pub entries: Arc<InMemoryEntryStore>,
    pub documents: Arc<InMemoryDocumentStore>,
    pub bitstring_queue: Arc<InMemorySlotQueue>,
    pub token_queue: Arc<InMemorySlotQueue>,
    pub audit: Arc<InMemoryAuditSink>,
}

fn endpoint(uri: &str, max_indices: u32) -> ListEndpoint {
    ListEndpoint {
        created: "2025-01-05T14:00:00Z".to_string(),
        uri: uri.to_string(),
        max_indices,
        format: "statuslist+jwt".to_string(),
    }
}

fn client(name: &str, client_id: &str, list_type: ListType, format: &str) -> ClientEntry {
    ClientEntry {
        client_name: name.to_string(),
        client_id: client_id.to_string(),
        status_list: ClientStatusList {
            jwks_uri: JWKS_URI.to_string(),
            list_type,
            format: format.to_string(),
        },
    }
}

/// Wires a complete registry over in-memory collaborators.
pub fn spawn_registry() -> TestRegistry {
    let client_signer = LocalSigner::generate(KID.to_string()).unwrap();
    let key_set = JsonWebKeySet {
        keys: vec![client_signer.public_jwk().unwrap()],
    };

    let registry = ClientRegistry {
        clients: vec![
            client(
                "OVA",
                BITSTRING_CLIENT_ID,
                ListType::BitstringStatusList,
                "vc+jwt",
            ),
            client(
                "DVLA",
                TOKEN_CLIENT_ID,
                ListType::TokenStatusList,
                "statuslist+jwt",
            ),
        ],
    };
    let lists = ListConfiguration {
        bitstring_status_list: vec![endpoint(&format!("{COMPONENT_ID}/b/BBB"), 256)],
        token_status_list: vec![
            endpoint(&format!("{COMPONENT_ID}/t/TTT"), 256),
            endpoint(&format!("{COMPONENT_ID}/t/XYZ"), 256),
        ],
    };

    let document_signer = LocalSigner::generate("status-list-key".to_string()).unwrap();
    let document_signer_jwk = document_signer.public_jwk().unwrap();

    let entries = Arc::new(InMemoryEntryStore::new());
    let documents = Arc::new(InMemoryDocumentStore::new());
    let bitstring_queue = Arc::new(InMemorySlotQueue::new());
    let token_queue = Arc::new(InMemorySlotQueue::new());
    let audit = Arc::new(InMemoryAuditSink::new());

    let deps = RegistryDeps {
        entries: entries.clone(),
        bitstring_queue: bitstring_queue.clone(),
        token_queue: token_queue.clone(),
        documents: documents.clone(),
        audit: audit.clone(),
        signer: Arc::new(document_signer),
        clients: Arc::new(StaticClientRegistry(registry)),
        lists: Arc::new(StaticListConfiguration(lists)),
        key_sets: Arc::new(StaticKeySets::new().with(JWKS_URI, key_set)),
    };
    let service = RegistryService::start(
        deps,
        RegistrySettings {
            component_id: COMPONENT_ID.to_string(),
            target_queue_depth: 20,
            max_claim_attempts: 5,
            signing_timeout: Duration::from_secs(5),
        },
    );

    TestRegistry {
        service,
        client_signer,
        document_signer_jwk,
        entries,
        documents,
        bitstring_queue,
        token_queue,
        audit,
    }
}

pub fn issuance_request(registry: &TestRegistry, client_id: &str, expires: i64) -> String {
    registry
        .client_signer
        .sign_compact(
            &json!({"alg": "ES256", "typ": "JWT", "kid": KID}),
            &json!({"iss": client_id, "expires": expires}),
        )
        .unwrap()
}

pub fn revocation_request(
    registry: &TestRegistry,
    client_id: &str,
    idx: u32,
    uri: &str,
) -> String {
    registry
        .client_signer
        .sign_compact(
            &json!({"alg": "ES256", "typ": "JWT", "kid": KID}),
            &json!({"iss": client_id, "idx": idx, "iat": 1_700_000_000, "uri": uri}),
        )
        .unwrap()
}

pub async fn seed_entry(
    registry: &TestRegistry,
    suffix: &str,
    idx: u32,
    client_id: &str,
    list_type: ListType,
) {
    use crs_server::domain::registry::store::EntryStore as _;
    registry
        .entries
        .create_if_absent(StatusListEntry {
            uri: suffix.to_string(),
            idx,
            client_id: client_id.to_string(),
            issuer: "Seeded".to_string(),
            issued_at: 1_700_000_000,
            exp: 1_900_000_000,
            list_type,
            revoked_at: None,
        })
        .await
        .unwrap();
}

/// Waits for the publish pipeline to store a document under `key`.
pub async fn wait_for_document(registry: &TestRegistry, key: &str) -> PublishedDocument {
    use crs_server::domain::registry::documents::DocumentStore as _;
    for _ in 0..100 {
        if let Some(document) = registry.documents.get(key).await.unwrap() {
            return document;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no document published under {key}");
}
