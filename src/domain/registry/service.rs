//! Wires the registry together: dependency handles in, coordinators and the
//! publish pipeline out.
//!
//! The API gateway in front of the registry calls [`RegistryService::issue`]
//! and [`RegistryService::revoke`]; the slot-pool refill and the ordered
//! republish pipeline run here regardless of any transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::responses::ApiResponse;

use super::allocator::{AllocationError, RefillOutcome, SlotAllocator};
use super::audit::{AuditReporter, AuditSink};
use super::auth::RequestAuthenticator;
use super::auth::keyset::KeySetFetcher;
use super::dispatch::OrderedDispatcher;
use super::documents::DocumentStore;
use super::issuance::IssuanceCoordinator;
use super::publisher::ListPublisher;
use super::queue::SlotQueue;
use super::revocation::RevocationCoordinator;
use super::signer::SigningService;
use super::sources::{ClientRegistrySource, ListConfigSource};
use super::store::{CapturingStore, EntryStore};

/// Handles to every external collaborator, injected once at startup.
pub struct RegistryDeps {
    pub entries: Arc<dyn EntryStore>,
    pub bitstring_queue: Arc<dyn SlotQueue>,
    pub token_queue: Arc<dyn SlotQueue>,
    pub documents: Arc<dyn DocumentStore>,
    pub audit: Arc<dyn AuditSink>,
    pub signer: Arc<dyn SigningService>,
    pub clients: Arc<dyn ClientRegistrySource>,
    pub lists: Arc<dyn ListConfigSource>,
    pub key_sets: Arc<dyn KeySetFetcher>,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub component_id: String,
    pub target_queue_depth: usize,
    pub max_claim_attempts: u32,
    pub signing_timeout: Duration,
}

pub struct RegistryService {
    issuance: IssuanceCoordinator,
    revocation: RevocationCoordinator,
    allocator: SlotAllocator,
    dispatcher: JoinHandle<()>,
}

impl RegistryService {
    /// Builds the coordinators and starts the change-capture -> ordered
    /// dispatch -> publish pipeline.
    pub fn start(deps: RegistryDeps, settings: RegistrySettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Coordinators write through the capturing decorator so every
        // successful mutation feeds the republish pipeline.
        let captured: Arc<dyn EntryStore> =
            Arc::new(CapturingStore::new(deps.entries.clone(), events_tx));

        let authenticator = Arc::new(RequestAuthenticator::new(
            deps.clients,
            deps.key_sets,
            captured.clone(),
        ));
        let audit = AuditReporter::new(deps.audit, settings.component_id.clone());

        let issuance = IssuanceCoordinator::new(
            authenticator.clone(),
            captured.clone(),
            deps.bitstring_queue.clone(),
            deps.token_queue.clone(),
            audit.clone(),
            settings.max_claim_attempts,
        );
        let revocation = RevocationCoordinator::new(authenticator, captured, audit);

        let allocator = SlotAllocator::new(
            deps.lists.clone(),
            deps.bitstring_queue,
            deps.token_queue,
            settings.target_queue_depth,
        );

        let publisher = Arc::new(ListPublisher::new(
            deps.entries,
            deps.lists,
            deps.signer,
            deps.documents,
            settings.component_id,
            settings.signing_timeout,
        ));
        let dispatcher = OrderedDispatcher::new(publisher).spawn(events_rx);

        Self {
            issuance,
            revocation,
            allocator,
            dispatcher,
        }
    }

    /// Handles a signed issuance request.
    pub async fn issue(&self, raw_token: &str) -> ApiResponse {
        self.issuance.issue(raw_token).await
    }

    /// Handles a signed revocation request.
    pub async fn revoke(&self, raw_token: &str) -> ApiResponse {
        self.revocation.revoke(raw_token).await
    }

    /// Tops up the slot pools towards the configured depth.
    pub async fn refill(&self) -> Result<RefillOutcome, AllocationError> {
        self.allocator.refill().await
    }

    /// Drops the coordinators and waits for the publish pipeline to drain
    /// the in-flight events.
    pub async fn shutdown(self) {
        let Self {
            issuance,
            revocation,
            allocator,
            dispatcher,
        } = self;
        drop(issuance);
        drop(revocation);
        drop(allocator);
        let _ = dispatcher.await;
    }
}
