//! Organization directory collaborator.

use std::{collections::HashMap, path::Path, sync::RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::EngineError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRecord {
    pub address: String,
    #[serde(default)]
    pub name: String,
    pub messaging_endpoint: String,
    /// Hex ed25519 key that envelopes from this organization must verify
    /// against.
    pub signing_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zk_public_key: Option<String>,
}

/// Resolves organization addresses to their messaging endpoint and keys.
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    /// Fails with [`EngineError::NotFound`] for unknown addresses.
    async fn resolve(&self, address: &str) -> Result<OrganizationRecord, EngineError>;

    async fn register(&self, record: OrganizationRecord) -> Result<(), EngineError>;
}

#[derive(Default)]
pub struct StaticDirectory {
    records: RwLock<HashMap<String, OrganizationRecord>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = OrganizationRecord>) -> Self {
        let directory = Self::new();
        if let Ok(mut map) = directory.records.write() {
            for record in records {
                map.insert(directory_key(&record.address), record);
            }
        }
        directory
    }

    /// Load a JSON array of [`OrganizationRecord`]s.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<OrganizationRecord> = serde_json::from_str(&raw).map_err(|err| {
            EngineError::Config(format!("directory {}: {}", path.display(), err))
        })?;
        info!(path = %path.display(), organizations = records.len(), "loaded organization directory");
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn directory_key(address: &str) -> String {
    address.to_ascii_lowercase()
}

#[async_trait]
impl OrganizationDirectory for StaticDirectory {
    async fn resolve(&self, address: &str) -> Result<OrganizationRecord, EngineError> {
        self.records
            .read()
            .map_err(|_| EngineError::ProtocolViolation("directory lock poisoned".into()))?
            .get(&directory_key(address))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("organization {}", address)))
    }

    async fn register(&self, record: OrganizationRecord) -> Result<(), EngineError> {
        if record.address.is_empty() || record.messaging_endpoint.is_empty() {
            return Err(EngineError::InvalidArgument(
                "organization record needs an address and a messaging endpoint".into(),
            ));
        }
        self.records
            .write()
            .map_err(|_| EngineError::ProtocolViolation("directory lock poisoned".into()))?
            .insert(directory_key(&record.address), record);
        Ok(())
    }
}
