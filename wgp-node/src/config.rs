//! Node configuration from flags and `WGP_*` environment variables.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use wgp_engine::{config::DEFAULT_NAMESPACE, ParticipantConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "wgp-node", about = "Workgroup protocol participant")]
pub struct NodeArgs {
    /// This organization's address.
    #[arg(long, env = "WGP_ORG_ADDRESS")]
    pub org_address: String,

    #[arg(long, env = "WGP_ORG_NAME", default_value = "")]
    pub org_name: String,

    /// Base URL counterparties publish to, e.g. `http://supplier.example:4222`.
    #[arg(long, env = "WGP_MESSAGING_ENDPOINT")]
    pub messaging_endpoint: String,

    /// Address the inbound server binds.
    #[arg(long, env = "WGP_LISTEN", default_value = "0.0.0.0:4222")]
    pub listen: SocketAddr,

    #[arg(long, env = "WGP_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Hex ed25519 seed. A fresh key is generated when absent.
    #[arg(long, env = "WGP_SIGNING_SEED", hide_env_values = true)]
    pub signing_seed: Option<String>,

    #[arg(long, env = "WGP_SHIELD_ADDRESS")]
    pub shield_address: Option<String>,

    #[arg(long, env = "WGP_WORKFLOW_ID")]
    pub workflow_id: Option<String>,

    #[arg(long, env = "WGP_COMMIT_MGR_URL", default_value = "http://localhost:4001")]
    pub commit_mgr_url: String,

    /// JSON array of organization records.
    #[arg(long, env = "WGP_DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// JSON availability calendar.
    #[arg(long, env = "WGP_AVAILABILITY")]
    pub availability: Option<PathBuf>,

    /// Compiled circuit directory (`out`, `abi.json`, `keys/proving.key`).
    #[arg(long, env = "WGP_CIRCUIT_DIR")]
    pub circuit_dir: Option<PathBuf>,

    /// External prover executable driven through its CLI.
    #[arg(long, env = "WGP_PROVER_BIN")]
    pub prover_bin: Option<PathBuf>,

    /// Workgroup invite (token claims or bare params) to accept at startup.
    #[arg(long, env = "WGP_INVITE")]
    pub invite: Option<PathBuf>,

    #[arg(long, env = "WGP_POLL_INTERVAL_MS", default_value_t = 2500)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "WGP_ORG_TIMEOUT_MS", default_value_t = 60_000)]
    pub org_timeout_ms: u64,

    #[arg(long, env = "WGP_LOG_JSON")]
    pub log_json: bool,
}

impl NodeArgs {
    pub fn participant_config(&self) -> ParticipantConfig {
        let mut config = ParticipantConfig::new(&self.org_address, &self.messaging_endpoint);
        config.organization_name = self.org_name.clone();
        config.namespace = self.namespace.clone();
        config.shield_address = self.shield_address.clone();
        config.workflow_id = self.workflow_id.clone();
        config.poll_interval_ms = self.poll_interval_ms;
        config.organization_timeout_ms = self.org_timeout_ms;
        config
    }

    pub fn signing_seed(&self) -> Result<Option<[u8; 32]>> {
        let Some(raw) = self.signing_seed.as_deref() else {
            return Ok(None);
        };
        let bytes = hex::decode(raw.trim_start_matches("0x")).context("signing seed is not hex")?;
        let Ok(seed) = <[u8; 32]>::try_from(bytes.as_slice()) else {
            bail!("signing seed must be 32 bytes, got {}", bytes.len());
        };
        Ok(Some(seed))
    }
}
