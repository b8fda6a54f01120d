use std::sync::Arc;

use color_eyre::eyre::Context as _;
use crs_server::{
    config::Config,
    domain::registry::{
        allocator::RefillOutcome,
        audit::{AuditSink, RedisAuditSink, TracingAuditSink},
        auth::keyset::HttpKeySetFetcher,
        documents::{DocumentStore, InMemoryDocumentStore, RedisDocumentStore},
        queue::{InMemorySlotQueue, RedisSlotQueue, SlotQueue},
        service::{RegistryDeps, RegistryService, RegistrySettings},
        signer::LocalSigner,
        sources::{FileClientRegistry, FileListConfiguration},
        store::{EntryStore, InMemoryEntryStore, RedisEntryStore},
    },
    telemetry,
};

const BITSTRING_POOL_KEY: &str = "statuslist:pool:bitstring";
const TOKEN_POOL_KEY: &str = "statuslist:pool:token";
const AUDIT_QUEUE_KEY: &str = "statuslist:audit";

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let config = Config::load().context("loading configuration")?;
    tracing::info!("Loaded configuration: {:?}", config.registry);

    let (entries, bitstring_queue, token_queue, documents, audit): (
        Arc<dyn EntryStore>,
        Arc<dyn SlotQueue>,
        Arc<dyn SlotQueue>,
        Arc<dyn DocumentStore>,
        Arc<dyn AuditSink>,
    ) = match &config.redis {
        Some(redis) => {
            let conn = redis.start().await.context("connecting to redis")?;
            (
                Arc::new(RedisEntryStore::new(conn.clone())),
                Arc::new(RedisSlotQueue::new(conn.clone(), BITSTRING_POOL_KEY)),
                Arc::new(RedisSlotQueue::new(conn.clone(), TOKEN_POOL_KEY)),
                Arc::new(RedisDocumentStore::new(conn.clone())),
                Arc::new(RedisAuditSink::new(conn, AUDIT_QUEUE_KEY)),
            )
        }
        None => {
            tracing::warn!("no redis configured, falling back to in-memory stores");
            (
                Arc::new(InMemoryEntryStore::new()),
                Arc::new(InMemorySlotQueue::new()),
                Arc::new(InMemorySlotQueue::new()),
                Arc::new(InMemoryDocumentStore::new()),
                Arc::new(TracingAuditSink),
            )
        }
    };

    let signer = match &config.signing.private_key_path {
        Some(path) => {
            let pem = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading signing key from {path}"))?;
            LocalSigner::from_private_key_pem(config.signing.kid.clone(), &pem)
                .context("loading signing key")?
        }
        None => {
            tracing::warn!("no signing key configured, generating an ephemeral key");
            LocalSigner::generate(config.signing.kid.clone()).context("generating signing key")?
        }
    };

    let deps = RegistryDeps {
        entries,
        bitstring_queue,
        token_queue,
        documents,
        audit,
        signer: Arc::new(signer),
        clients: Arc::new(FileClientRegistry::new(&config.registry.client_registry_path)),
        lists: Arc::new(FileListConfiguration::new(
            &config.registry.list_configuration_path,
        )),
        key_sets: Arc::new(HttpKeySetFetcher::new(config.timeouts.key_set_fetch())),
    };
    let service = RegistryService::start(
        deps,
        RegistrySettings {
            component_id: config.registry.component_id.clone(),
            target_queue_depth: config.registry.target_queue_depth,
            max_claim_attempts: config.registry.max_claim_attempts,
            signing_timeout: config.timeouts.signing(),
        },
    );

    tracing::info!("registry worker started, publish pipeline running");

    // The refill loop keeps the slot pools topped up; issue/revoke requests
    // reach the service through the API gateway in front of this process.
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.registry.refill_interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match service.refill().await {
                    Ok(RefillOutcome::NotNeeded { bitstring_depth, token_depth }) => {
                        tracing::debug!(bitstring_depth, token_depth, "slot pools at target depth");
                    }
                    Ok(RefillOutcome::Refilled { bitstring, token }) => {
                        tracing::info!(
                            bitstring_added = bitstring.messages_added,
                            token_added = token.messages_added,
                            "refilled slot pools"
                        );
                    }
                    Err(e) => tracing::error!("slot pool refill failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    service.shutdown().await;
    Ok(())
}
