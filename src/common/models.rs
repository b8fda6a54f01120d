use std::fmt;

use serde::{Deserialize, Serialize};

/// The two status-list representations served by the registry.
///
/// The wire names match the `type` field of the client registry document and
/// the `listType` attribute stored on every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListType {
    BitstringStatusList,
    TokenStatusList,
}

impl ListType {
    /// Parses the one-character path indicator of a status-list URI
    /// (`.../{b|t}/{suffix}`).
    pub fn from_indicator(indicator: &str) -> Option<Self> {
        match indicator {
            "b" => Some(Self::BitstringStatusList),
            "t" => Some(Self::TokenStatusList),
            _ => None,
        }
    }

    /// The path indicator under which documents of this type are published.
    pub fn indicator(&self) -> &'static str {
        match self {
            Self::BitstringStatusList => "b",
            Self::TokenStatusList => "t",
        }
    }
}

impl std::str::FromStr for ListType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BitstringStatusList" => Ok(Self::BitstringStatusList),
            "TokenStatusList" => Ok(Self::TokenStatusList),
            other => Err(format!("unknown list type: {other}")),
        }
    }
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BitstringStatusList => "BitstringStatusList",
            Self::TokenStatusList => "TokenStatusList",
        };
        write!(f, "{name}")
    }
}

/// One claimed slot of a status list, keyed by `(uri, idx)`.
///
/// `uri` is the list identifier suffix (the trailing path segment of the
/// public list URI); `idx` is unique within it. `client_id` and `list_type`
/// are bound once at claim time, `revoked_at` is set at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusListEntry {
    pub uri: String,
    pub idx: u32,
    pub client_id: String,
    pub issuer: String,
    pub issued_at: i64,
    pub exp: i64,
    pub list_type: ListType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
}

impl StatusListEntry {
    /// Whether the advisory expiry has elapsed at `now` (epoch seconds).
    pub fn is_expired(&self, now: i64) -> bool {
        self.exp <= now
    }
}

/// A pre-allocated, not-yet-claimed `(uri, idx)` pair, carried through the
/// slot pool. `uri` here is the full endpoint URI from the list
/// configuration, so issuers receive a resolvable location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPair {
    pub uri: String,
    pub idx: u32,
}

/// Per-client status-list settings from the client registry document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatusList {
    pub jwks_uri: String,
    #[serde(rename = "type")]
    pub list_type: ListType,
    pub format: String,
}

/// A registered issuer. Immutable reference data owned by the external
/// configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEntry {
    pub client_name: String,
    pub client_id: String,
    pub status_list: ClientStatusList,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRegistry {
    pub clients: Vec<ClientEntry>,
}

impl ClientRegistry {
    pub fn find(&self, client_id: &str) -> Option<&ClientEntry> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }
}

/// One published list endpoint from the status-list configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEndpoint {
    pub created: String,
    pub uri: String,
    pub max_indices: u32,
    pub format: String,
}

impl ListEndpoint {
    /// The list identifier suffix, i.e. the trailing path segment of `uri`.
    pub fn suffix(&self) -> &str {
        self.uri.rsplit('/').next().unwrap_or(&self.uri)
    }
}

/// The status-list configuration document: every endpoint the registry
/// publishes, per list type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConfiguration {
    pub bitstring_status_list: Vec<ListEndpoint>,
    pub token_status_list: Vec<ListEndpoint>,
}

impl ListConfiguration {
    pub fn endpoints(&self, list_type: ListType) -> &[ListEndpoint] {
        match list_type {
            ListType::BitstringStatusList => &self.bitstring_status_list,
            ListType::TokenStatusList => &self.token_status_list,
        }
    }

    pub fn has_endpoints(&self) -> bool {
        !self.bitstring_status_list.is_empty() || !self.token_status_list.is_empty()
    }

    /// The smallest configured capacity across both list types. No endpoint
    /// is ever asked for more unique indices than this.
    pub fn max_index_per_endpoint(&self) -> u32 {
        self.bitstring_status_list
            .iter()
            .chain(self.token_status_list.iter())
            .map(|e| e.max_indices)
            .min()
            .unwrap_or(0)
    }

    /// Looks up the configured capacity of the endpoint publishing `suffix`.
    pub fn capacity_for_suffix(&self, suffix: &str) -> Option<u32> {
        self.bitstring_status_list
            .iter()
            .chain(self.token_status_list.iter())
            .find(|e| e.suffix() == suffix)
            .map(|e| e.max_indices)
    }
}
