//! Workgroup participant: owns the engine state and every outbound
//! protocol operation.

use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wgp_commitment::{CommitLog, CommitmentBuilder, LeafSubmission};
use wgp_common::{
    normalize_hash, sha256_concat, CommitmentMetaData, Job, SupplierContainer, VerifierInput,
};
use wgp_prover::{ProofPipeline, ProofType};

use crate::{
    availability::AvailabilityProvider,
    config::ParticipantConfig,
    directory::{OrganizationDirectory, OrganizationRecord},
    dispatch::{DefaultHooks, ProtocolHooks},
    envelope::{build_envelope, marshal_envelope, EnvelopeHeader, Opcode},
    inbound::AuthorizedTokens,
    keys::KeyCustody,
    payload::{AvailabilityPayload, AvailabilityRequest, JoinPayload, MatchJob, SelectionNotice},
    poller::await_condition,
    state::{
        CounterSnapshot, EngineState, LocalCommitment, ProtocolCounters, SharedState, ShieldLocks,
    },
    transport::Transport,
    EngineError,
};

/// External services a participant talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn OrganizationDirectory>,
    pub keys: Arc<dyn KeyCustody>,
    pub transport: Arc<dyn Transport>,
    pub commit_log: Arc<dyn CommitLog>,
    pub availability: Arc<dyn AvailabilityProvider>,
    /// Needed only by participants that push commitments.
    pub prover: Option<Arc<ProofPipeline>>,
}

/// Invitation to join a workgroup, as carried in the invite token's
/// `prvd.data.params` claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkgroupInvite {
    #[serde(rename = "invitor_organization_address")]
    pub invitor_address: String,
    #[serde(rename = "shield_contract_address")]
    pub shield_address: String,
    pub authorized_bearer_token: String,
    #[serde(rename = "workflow_identifier")]
    pub workflow_id: String,
}

impl WorkgroupInvite {
    /// Accepts either full token claims or the bare params object.
    pub fn from_claims(claims: &Value) -> Result<Self, EngineError> {
        let params = claims.pointer("/prvd/data/params").unwrap_or(claims);
        let invite: WorkgroupInvite = serde_json::from_value(params.clone())?;
        if invite.invitor_address.is_empty() || invite.authorized_bearer_token.is_empty() {
            return Err(EngineError::MalformedPayload(
                "invite without invitor address or bearer token".into(),
            ));
        }
        Ok(invite)
    }
}

/// Result of pushing a workflow state to the commitment log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub shield: String,
    pub leaf_index: u64,
    pub commitment_hash: String,
    pub proof_type: ProofType,
    pub verifier_input: VerifierInput,
}

pub struct Participant {
    pub(crate) config: ParticipantConfig,
    pub(crate) directory: Arc<dyn OrganizationDirectory>,
    pub(crate) keys: Arc<dyn KeyCustody>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) commitments: CommitmentBuilder<Arc<dyn CommitLog>>,
    pub(crate) availability: Arc<dyn AvailabilityProvider>,
    pub(crate) prover: Option<Arc<ProofPipeline>>,
    pub(crate) hooks: Arc<dyn ProtocolHooks>,
    pub(crate) tokens: AuthorizedTokens,
    pub(crate) state: SharedState,
    pub(crate) counters: ProtocolCounters,
    pub(crate) shield_locks: ShieldLocks,
    shutdown: CancellationToken,
}

impl Participant {
    pub fn new(config: ParticipantConfig, collaborators: Collaborators) -> Result<Self, EngineError> {
        config.validate()?;
        let state = EngineState {
            shield_address: config.shield_address.clone(),
            workflow_id: config.workflow_id.clone(),
            ..EngineState::default()
        };
        Ok(Self {
            commitments: CommitmentBuilder::new(collaborators.commit_log)
                .with_window(config.leaf_window),
            config,
            directory: collaborators.directory,
            keys: collaborators.keys,
            transport: collaborators.transport,
            availability: collaborators.availability,
            prover: collaborators.prover,
            hooks: Arc::new(DefaultHooks),
            tokens: AuthorizedTokens::new(),
            state: SharedState::new(state),
            counters: ProtocolCounters::default(),
            shield_locks: ShieldLocks::default(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ProtocolHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Share the token set checked by the inbound server.
    pub fn with_authorized_tokens(mut self, tokens: AuthorizedTokens) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    pub fn address(&self) -> &str {
        &self.config.organization_address
    }

    pub fn authorized_tokens(&self) -> &AuthorizedTokens {
        &self.tokens
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn state(&self) -> Result<EngineState, EngineError> {
        self.state.snapshot()
    }

    pub fn commit_log(&self) -> &Arc<dyn CommitLog> {
        self.commitments.log()
    }

    /// Cancelled when the participant shuts down; aborts pending polls.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // OUTBOUND MESSAGING
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Sign `payload`, wrap it for `recipient` and publish it on the
    /// recipient's messaging endpoint.
    pub async fn send_protocol_message<P>(
        &self,
        recipient: &str,
        opcode: Opcode,
        payload: &P,
    ) -> Result<(), EngineError>
    where
        P: Serialize + ?Sized,
    {
        let record = self.directory.resolve(recipient).await?;
        let body = serde_json::to_value(payload)?;

        let (token, shield, workflow_id) = {
            let mut state = self.state.lock()?;
            let token = state
                .bearer_tokens
                .get(&record.messaging_endpoint)
                .cloned()
                .ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "no bearer token for {} at {}",
                        recipient, record.messaging_endpoint
                    ))
                })?;
            if let Some(id) = record_id(&body) {
                state
                    .workflow_records
                    .entry(id)
                    .or_insert_with(|| body.clone());
            }
            (
                token,
                state.shield_address.clone().unwrap_or_default(),
                state.workflow_id.clone().unwrap_or_default(),
            )
        };

        let envelope = build_envelope(
            self.keys.as_ref(),
            &self.config.signing_key_ref,
            opcode,
            EnvelopeHeader {
                sender: &self.config.organization_address,
                recipient,
                shield_address: &shield,
                workflow_id: &workflow_id,
            },
            serde_json::to_vec(&body)?,
        )
        .await?;
        let wire = marshal_envelope(&envelope)?;

        self.transport
            .publish(&record.messaging_endpoint, &token, &self.config.subject(), wire)
            .await?;
        self.counters.record_tx();
        info!(%recipient, opcode = %envelope.opcode, "sent protocol message");
        Ok(())
    }

    /// Send to every counterparty. All sends are attempted; the first failure
    /// is returned. Returns the number of successful sends otherwise.
    pub async fn broadcast<P>(&self, opcode: Opcode, payload: &P) -> Result<usize, EngineError>
    where
        P: Serialize + ?Sized,
    {
        let recipients = self.state.lock()?.counterparties.clone();
        let mut sent = 0;
        let mut first_error = None;
        for recipient in &recipients {
            match self.send_protocol_message(recipient, opcode.clone(), payload).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(%recipient, %opcode, error = %err, "broadcast send failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(sent),
        }
    }

    /// Issue a fresh bearer token counterparties can publish to us with.
    pub fn vend_authorization(&self) -> Result<String, EngineError> {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.tokens.insert(token.clone())?;
        info!(subject = %self.config.subject(), "vended bearer token");
        Ok(token)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // WORKGROUP MEMBERSHIP
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Invite for a new workgroup member: our address, the bound shield and
    /// workflow, and a freshly vended bearer token.
    pub fn create_invite(&self) -> Result<WorkgroupInvite, EngineError> {
        let (shield_address, workflow_id) = {
            let state = self.state.lock()?;
            (state.shield_address.clone(), state.workflow_id.clone())
        };
        let shield_address = shield_address
            .ok_or_else(|| EngineError::Config("no shield address to invite to".into()))?;
        let workflow_id = workflow_id
            .ok_or_else(|| EngineError::Config("no workflow to invite to".into()))?;

        let invite = WorkgroupInvite {
            invitor_address: self.config.organization_address.clone(),
            shield_address,
            authorized_bearer_token: self.vend_authorization()?,
            workflow_id,
        };
        info!(shield = %invite.shield_address, workflow = %invite.workflow_id, "created workgroup invite");
        Ok(invite)
    }

    /// Join the workgroup described by `invite` and announce ourselves to the
    /// invitor with a `JOIN`.
    pub async fn accept_invite(&self, invite: WorkgroupInvite) -> Result<(), EngineError> {
        let invitor = self.directory.resolve(&invite.invitor_address).await?;

        {
            let mut state = self.state.lock()?;
            if state
                .workflow_id
                .as_deref()
                .is_some_and(|current| current != invite.workflow_id)
            {
                return Err(EngineError::ProtocolViolation(format!(
                    "already bound to workflow {:?}",
                    state.workflow_id
                )));
            }
            state.add_counterparty(&invite.invitor_address);
            state.bearer_tokens.insert(
                invitor.messaging_endpoint.clone(),
                invite.authorized_bearer_token.clone(),
            );
            state.shield_address = Some(invite.shield_address.clone());
            state.workflow_id = Some(invite.workflow_id.clone());
        }

        self.track_shield(&invite.shield_address).await?;
        self.register_organization().await?;
        self.require_organization(&self.config.organization_address)
            .await?;

        let join = JoinPayload {
            address: self.config.organization_address.clone(),
            authorized_bearer_token: self.vend_authorization()?,
            workflow_identifier: Some(invite.workflow_id.clone()),
        };
        self.send_protocol_message(&invite.invitor_address, Opcode::Join, &join)
            .await?;

        info!(
            invitor = %invite.invitor_address,
            shield = %invite.shield_address,
            workflow = %invite.workflow_id,
            "accepted workgroup invite"
        );
        Ok(())
    }

    async fn track_shield(&self, shield: &str) -> Result<(), EngineError> {
        let log = self.commitments.log();
        match log.track(shield).await {
            Ok(true) => info!(%shield, "commit manager now tracking shield"),
            Ok(false) => info!(%shield, "shield already tracked"),
            Err(err) => {
                warn!(%shield, error = %err, "track failed, checking tracked shields");
                let tracked = log.get_tracked().await?;
                if !tracked.iter().any(|t| t.eq_ignore_ascii_case(shield)) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Publish this organization's endpoint and signing key in the directory.
    pub async fn register_organization(&self) -> Result<(), EngineError> {
        let signing_public_key = self.keys.public_key(&self.config.signing_key_ref).await?;
        self.directory
            .register(OrganizationRecord {
                address: self.config.organization_address.clone(),
                name: self.config.organization_name.clone(),
                messaging_endpoint: self.config.messaging_endpoint.clone(),
                signing_public_key,
                zk_public_key: None,
            })
            .await
    }

    /// Wait until `address` resolves in the directory.
    pub async fn require_organization(&self, address: &str) -> Result<OrganizationRecord, EngineError> {
        let directory = Arc::clone(&self.directory);
        let address = address.to_string();
        let config = self
            .config
            .poll_config()
            .with_timeout(self.config.organization_timeout());
        let record = await_condition(
            move || {
                let directory = Arc::clone(&directory);
                let address = address.clone();
                async move { directory.resolve(&address).await.ok() }
            },
            config,
            Some(&self.shutdown),
        )
        .await?;
        Ok(record)
    }

    /// Wait until the commit manager reports `shield` as tracked.
    pub async fn require_tracked_shield(&self, shield: &str) -> Result<(), EngineError> {
        let log = Arc::clone(self.commitments.log());
        let shield = shield.to_string();
        let config = self
            .config
            .poll_config()
            .with_timeout(self.config.organization_timeout());
        await_condition(
            move || {
                let log = Arc::clone(&log);
                let shield = shield.clone();
                async move {
                    let tracked = log.get_tracked().await.ok()?;
                    tracked
                        .iter()
                        .any(|t| t.eq_ignore_ascii_case(&shield))
                        .then_some(())
                }
            },
            config,
            Some(&self.shutdown),
        )
        .await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // OPERATOR ROLE
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Ask every counterparty for availability on `job`.
    pub async fn request_availability(
        &self,
        job: &Job,
        meta: &CommitmentMetaData,
    ) -> Result<usize, EngineError> {
        let request = AvailabilityRequest::new(job.id.clone(), job, meta)?;
        let payload = AvailabilityPayload::MatchJob(MatchJob::Request(request));
        self.broadcast(Opcode::Availability, &payload).await
    }

    /// Tell `recipient` whether it was selected. Accepted proposals carry our
    /// signature over `SHA-256(proposal)`.
    pub async fn notify_selection(
        &self,
        recipient: &str,
        proposal: &str,
        status: bool,
        leaf_index: Option<u64>,
    ) -> Result<(), EngineError> {
        let signatures = if status {
            let hash = sha256_concat([proposal.as_bytes()]);
            vec![self.keys.sign(&self.config.signing_key_ref, &hash).await?]
        } else {
            Vec::new()
        };
        let notice = SelectionNotice {
            status,
            proposal: proposal.to_string(),
            signatures,
            selected_address: Some(recipient.to_string()),
            leaf_index,
            selection_range: None,
        };
        self.send_protocol_message(
            recipient,
            Opcode::Availability,
            &AvailabilityPayload::NotifySelection(notice),
        )
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // COMMITMENTS
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Build, prove and push the commitment for `meta.state`.
    ///
    /// Only one leaf may be outstanding per shield: if the log has moved past
    /// the last leaf this participant pushed, nothing is pushed. Later states
    /// chain from that leaf wherever it sits in the log.
    pub async fn commit_workflow_state(
        &self,
        job: &Job,
        meta: &CommitmentMetaData,
        supplier: Option<SupplierContainer>,
    ) -> Result<CommitReceipt, EngineError> {
        let prover = self
            .prover
            .as_ref()
            .ok_or_else(|| EngineError::Config("no proof pipeline configured".into()))?;
        let shield = meta.shield_addr.clone();
        let _guard = self.shield_locks.acquire(&shield).await?;

        // our leaf must still be the last one; a later leaf means the log moved
        let local = self.state.lock()?.local_commitments.get(&shield).cloned();
        let input = match local {
            Some(local) => {
                let stored = self
                    .commitments
                    .log()
                    .get_leaves(&shield, local.leaf_index, 2)
                    .await?;
                match stored.as_slice() {
                    [leaf] if normalize_hash(&leaf.hash) == local.hash => {
                        self.commitments.build_after(job, meta, supplier, Some(leaf))?
                    }
                    _ => {
                        return Err(EngineError::CommitmentMismatch {
                            shield,
                            built: local.hash,
                            stored: stored
                                .last()
                                .map(|leaf| normalize_hash(&leaf.hash))
                                .unwrap_or_else(|| "<empty>".into()),
                        });
                    }
                }
            }
            None => self.commitments.build(job, meta, supplier).await?,
        };
        let commitment_hash = input.commitment_hash()?;
        let proof_type = ProofType::for_state(meta.state.0);
        let output = prover
            .generate_proof(proof_type.as_str(), input.public_inputs())
            .await?;

        let submission = LeafSubmission {
            sender: self.config.organization_address.clone(),
            value: commitment_hash.clone(),
            public_inputs: output.public_inputs,
            proof: output.proof.0,
        };
        let leaf_index = self.commitments.log().append_leaf(&shield, &submission).await?;

        self.state
            .lock()?
            .local_commitments
            .insert(
                shield.clone(),
                LocalCommitment {
                    hash: commitment_hash.clone(),
                    leaf_index,
                },
            );

        info!(
            %shield,
            state = %meta.state,
            job = %job.id,
            leaf_index,
            commitment = %commitment_hash,
            "pushed workflow state"
        );
        Ok(CommitReceipt {
            shield,
            leaf_index,
            commitment_hash,
            proof_type,
            verifier_input: input,
        })
    }
}

/// Id of an outbound payload, either top level or inside its phase tag.
fn record_id(payload: &Value) -> Option<String> {
    let object = payload.as_object()?;
    let id = object.get("id").or_else(|| {
        if object.len() == 1 {
            object.values().next()?.get("id")
        } else {
            None
        }
    })?;
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn invite_from_token_claims() {
        let claims = json!({
            "sub": "invitee",
            "prvd": {"data": {"params": {
                "invitor_organization_address": "0xop",
                "shield_contract_address": "0xshield",
                "authorized_bearer_token": "tok",
                "workflow_identifier": "wf-1"
            }}}
        });
        let invite = WorkgroupInvite::from_claims(&claims).unwrap();
        assert_eq!(invite.invitor_address, "0xop");
        assert_eq!(invite.workflow_id, "wf-1");

        let bare = WorkgroupInvite::from_claims(&claims["prvd"]["data"]["params"]).unwrap();
        assert_eq!(bare, invite);

        let missing = json!({"shield_contract_address": "0xshield"});
        assert!(WorkgroupInvite::from_claims(&missing).is_err());
    }

    #[test]
    fn record_ids() {
        assert_eq!(record_id(&json!({"id": "7"})), Some("7".into()));
        assert_eq!(record_id(&json!({"MJ": {"id": 9}})), Some("9".into()));
        assert_eq!(record_id(&json!({"address": "0xabc"})), None);
        assert_eq!(record_id(&json!({"a": {"id": 1}, "b": 2})), None);
    }
}
