//! wgp-node
//!
//! Workgroup participant service.
//!
//! Startup:
//! 1. Wait for the commit manager to answer
//! 2. Register this organization in the directory
//! 3. Serve `POST /inbound/<namespace>.inbound`
//! 4. Accept a workgroup invite, if one was given
//! 5. Dispatch inbound messages until Ctrl-C

mod config;

use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use wgp_engine::{
    await_condition,
    commit_mgr::DEFAULT_RPC_TIMEOUT,
    config::DEFAULT_SIGNING_KEY_REF,
    serve_inbound,
    transport::DEFAULT_PUBLISH_TIMEOUT,
    AuthorizedTokens, CalendarAvailability, Collaborators, HttpTransport, InboundState,
    JsonRpcCommitLog, LocalKeyCustody, Participant, StaticDirectory, WorkgroupInvite,
};
use wgp_prover::{CircuitBackend, CircuitConfig, CommandBackend, ProofPipeline};

use crate::config::NodeArgs;

/// Capacity of the queue between the inbound server and the dispatch loop.
const INBOX_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = NodeArgs::parse();
    init_logging(args.log_json);

    let config = args.participant_config();
    config.validate()?;
    info!(
        address = %config.organization_address,
        endpoint = %config.messaging_endpoint,
        subject = %config.subject(),
        "starting wgp-node"
    );

    let keys = match args.signing_seed()? {
        Some(seed) => LocalKeyCustody::with_seed(DEFAULT_SIGNING_KEY_REF, seed),
        None => {
            let keys = LocalKeyCustody::new();
            let public = keys.generate(DEFAULT_SIGNING_KEY_REF);
            warn!(%public, "no signing seed configured, generated an ephemeral key");
            keys
        }
    };

    let directory = match &args.directory {
        Some(path) => StaticDirectory::from_json_file(path)?,
        None => StaticDirectory::new(),
    };
    let availability = match &args.availability {
        Some(path) => CalendarAvailability::from_json_file(path)?,
        None => CalendarAvailability::default(),
    };

    let commit_log = Arc::new(
        JsonRpcCommitLog::new(&args.commit_mgr_url, DEFAULT_RPC_TIMEOUT)
            .context("failed to create commit manager client")?,
    );
    wait_for_commit_manager(&commit_log, &config).await?;

    let tokens = AuthorizedTokens::new();
    let participant = Arc::new(
        Participant::new(
            config.clone(),
            Collaborators {
                directory: Arc::new(directory),
                keys: Arc::new(keys),
                transport: Arc::new(HttpTransport::new(DEFAULT_PUBLISH_TIMEOUT)?),
                commit_log,
                availability: Arc::new(availability),
                prover: proof_pipeline(&args),
            },
        )?
        .with_authorized_tokens(tokens.clone()),
    );
    participant
        .register_organization()
        .await
        .context("failed to register organization")?;

    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let subscription = serve_inbound(
        args.listen,
        InboundState::new(&config.subject(), tokens, inbox_tx),
    )
    .await
    .with_context(|| format!("failed to bind {}", args.listen))?;

    let cancel = participant.shutdown_token();
    let dispatch_handle = {
        let participant = Arc::clone(&participant);
        let cancel = cancel.clone();
        tokio::spawn(async move { participant.run(inbox_rx, cancel).await })
    };

    if let Some(path) = &args.invite {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read invite {}", path.display()))?;
        let claims: serde_json::Value =
            serde_json::from_str(&raw).context("failed to parse invite")?;
        let invite = WorkgroupInvite::from_claims(&claims)?;
        participant
            .accept_invite(invite)
            .await
            .context("failed to accept workgroup invite")?;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down wgp-node");

    participant.shutdown();
    subscription.unsubscribe().await?;
    dispatch_handle.await?;
    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wgp_node=info,wgp_engine=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn wait_for_commit_manager(
    commit_log: &Arc<JsonRpcCommitLog>,
    config: &wgp_engine::ParticipantConfig,
) -> Result<()> {
    info!(url = %commit_log.url(), "waiting for commit manager");
    let poll = config
        .poll_config()
        .with_timeout(config.organization_timeout());
    await_condition(
        || {
            let commit_log = Arc::clone(commit_log);
            async move { commit_log.ping().await.then_some(()) }
        },
        poll,
        None,
    )
    .await
    .context("commit manager did not become ready")?;
    info!("commit manager ready");
    Ok(())
}

fn proof_pipeline(args: &NodeArgs) -> Option<Arc<ProofPipeline>> {
    let Some(circuit_dir) = &args.circuit_dir else {
        warn!("no circuit directory configured, state commits are disabled");
        return None;
    };
    let backend: Arc<dyn CircuitBackend> = match &args.prover_bin {
        Some(bin) => Arc::new(CommandBackend::new(bin)),
        None => fallback_backend()?,
    };
    Some(Arc::new(ProofPipeline::new(
        CircuitConfig::with_dir(circuit_dir),
        backend,
    )))
}

#[cfg(feature = "mock")]
fn fallback_backend() -> Option<Arc<dyn CircuitBackend>> {
    warn!("no prover executable configured, using the mock circuit backend");
    Some(Arc::new(wgp_prover::MockCircuitBackend::new()))
}

#[cfg(not(feature = "mock"))]
fn fallback_backend() -> Option<Arc<dyn CircuitBackend>> {
    warn!("no prover executable configured, state commits are disabled");
    None
}
