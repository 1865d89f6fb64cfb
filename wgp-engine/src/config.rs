//! Participant configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wgp_commitment::LEAF_WINDOW;
use wgp_common::SupplierType;

use crate::{
    poller::{PollConfig, DEFAULT_POLL_INTERVAL},
    EngineError,
};

pub const DEFAULT_NAMESPACE: &str = "baseline";
pub const DEFAULT_SIGNING_KEY_REF: &str = "organization";
pub const DEFAULT_ORGANIZATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// This organization's address in the directory.
    pub organization_address: String,
    pub organization_name: String,
    /// Base URL counterparties publish to.
    pub messaging_endpoint: String,
    pub namespace: String,
    /// Key custody reference used for every signature this participant makes.
    pub signing_key_ref: String,
    pub shield_address: Option<String>,
    pub workflow_id: Option<String>,
    pub poll_interval_ms: u64,
    pub organization_timeout_ms: u64,
    /// Leaves `[0, leaf_window)` are searched for the previous commitment.
    pub leaf_window: u64,
    pub supplier_types: Vec<SupplierType>,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            organization_address: String::new(),
            organization_name: String::new(),
            messaging_endpoint: String::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            signing_key_ref: DEFAULT_SIGNING_KEY_REF.to_string(),
            shield_address: None,
            workflow_id: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            organization_timeout_ms: DEFAULT_ORGANIZATION_TIMEOUT.as_millis() as u64,
            leaf_window: LEAF_WINDOW,
            supplier_types: vec![SupplierType::technician()],
        }
    }
}

impl ParticipantConfig {
    pub fn new(
        organization_address: impl Into<String>,
        messaging_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            organization_address: organization_address.into(),
            messaging_endpoint: messaging_endpoint.into(),
            ..Self::default()
        }
    }

    /// Subject inbound protocol messages are published on.
    pub fn subject(&self) -> String {
        format!("{}.inbound", self.namespace)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(Duration::from_millis(self.poll_interval_ms), None)
    }

    pub fn organization_timeout(&self) -> Duration {
        Duration::from_millis(self.organization_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.organization_address.is_empty() {
            return Err(EngineError::Config("organization_address is required".into()));
        }
        if self.messaging_endpoint.is_empty() {
            return Err(EngineError::Config("messaging_endpoint is required".into()));
        }
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(EngineError::Config(format!(
                "invalid namespace {:?}",
                self.namespace
            )));
        }
        if self.supplier_types.is_empty() {
            return Err(EngineError::Config("at least one supplier type is required".into()));
        }
        if self.leaf_window == 0 {
            return Err(EngineError::Config("leaf_window must be positive".into()));
        }
        Ok(())
    }
}
