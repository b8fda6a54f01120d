use std::{collections::HashMap, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use redis::{
    Client as RedisClient, RedisResult,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub registry: RegistryConfig,
    pub signing: SigningConfig,
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Settings for the registry core: where the reference documents live and how
/// the slot pool is sized.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Public base URI of this registry, used as the component id in audit
    /// events and as the base of published list URIs.
    pub component_id: String,
    /// Path of the client registry JSON document.
    pub client_registry_path: String,
    /// Path of the status-list configuration JSON document.
    pub list_configuration_path: String,
    /// Number of pending slots each pool is refilled towards.
    pub target_queue_depth: usize,
    /// How many delivered slots an issuance may discard before giving up.
    pub max_claim_attempts: u32,
    /// Seconds between slot-pool refill runs.
    pub refill_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    /// Key id advertised in the header of published status-list tokens.
    pub kid: String,
    /// PEM file holding the EC P-256 signing key. When absent an ephemeral
    /// key is generated, which is only suitable for local runs.
    #[serde(default)]
    pub private_key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    pub key_set_fetch_secs: u64,
    pub signing_secs: u64,
}

impl TimeoutConfig {
    pub fn key_set_fetch(&self) -> Duration {
        Duration::from_secs(self.key_set_fetch_secs)
    }

    pub fn signing(&self) -> Duration {
        Duration::from_secs(self.signing_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub uri: SecretString,
}

impl RedisConfig {
    /// Establishes a new Redis connection based on the provided URI.
    ///
    /// - To enable TLS, the URI must use the `rediss://` scheme.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn start(&self) -> RedisResult<ConnectionManager> {
        let client = RedisClient::open(self.uri.expose_secret())?;
        let config = ConnectionManagerConfig::new().set_connection_timeout(Duration::from_secs(60));
        client.get_connection_manager_with_config(config).await
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default(
                "registry.component_id",
                "https://api.status-list.service.gov.uk",
            )?
            .set_default("registry.client_registry_path", "config/clients.json")?
            .set_default("registry.list_configuration_path", "config/lists.json")?
            .set_default("registry.target_queue_depth", 10_000)?
            .set_default("registry.max_claim_attempts", 5)?
            .set_default("registry.refill_interval_secs", 300)?
            .set_default("signing.kid", "status-list-key")?
            .set_default("timeouts.key_set_fetch_secs", 10)?
            .set_default("timeouts.signing_secs", 10)?
            .add_source(File::with_name("config/settings").required(false));

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // Should be in the format APP_REGISTRY__TARGET_QUEUE_DEPTH
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
