//! Inbound dispatch state machine.
//!
//! Each envelope is decoded, authenticated against the sender's directory
//! record and routed by `(opcode, phase)`:
//!
//! | opcode | phase           | effect                                          |
//! |--------|-----------------|-------------------------------------------------|
//! | JOIN   |                 | add counterparty, cache its bearer token        |
//! | AVAIL  | MJ response     | store the sender's availability                 |
//! | AVAIL  | MJ request      | verify commitment, answer with availability     |
//! | AVAIL  | NS              | countersign the proposal, forward as RN         |
//! | AVAIL  | RN              | record the agreement hash                       |
//!
//! Anything else is ignored.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wgp_common::{digest_to_hex, normalize_hash, sha256_concat};

use crate::{
    envelope::{parse_envelope, verify_envelope, Opcode, ProtocolEnvelope},
    payload::{
        AvailabilityPayload, AvailabilityRequest, AvailabilityResponse, InboundMessage,
        JoinPayload, MatchJob, NotificationResponse, SelectionNotice,
    },
    participant::Participant,
    EngineError,
};

/// Extension points for decisions the protocol leaves to the application.
#[async_trait]
pub trait ProtocolHooks: Send + Sync {
    /// Called when an operator tells us we were not selected.
    async fn on_selection_rejected(&self, _notice: &SelectionNotice) {}

    /// Decide whether to countersign an accepted selection from `sender`.
    async fn check_selection_notice(&self, _sender: &str, _notice: &SelectionNotice) -> bool {
        true
    }

    /// Decide whether a returned signature collection is acceptable.
    async fn check_signature_collection(&self, _document: &str, _signatures: &[String]) -> bool {
        true
    }

    async fn on_agreement(&self, _agreement_hash: &str, _response: &NotificationResponse) {}
}

pub struct DefaultHooks;

impl ProtocolHooks for DefaultHooks {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Opcode without a handler.
    Ignored,
    Joined { address: String, endpoint: String },
    AvailabilityRecorded { sender: String },
    AvailabilityAnswered { recipients: usize },
    /// Commitment verified but no supplier can take the job.
    NoEligibleSupplier,
    SelectionCountersigned { recipients: usize },
    SelectionRejected,
    AgreementRecorded { agreement_hash: String },
}

#[derive(Serialize)]
struct AgreementDocument<'a> {
    document: &'a str,
    #[serde(rename = "completeSetSignatures")]
    complete_set_signatures: String,
}

/// Hash identifying a fully signed document.
pub fn agreement_hash(document: &str, signatures: &[String]) -> Result<String, EngineError> {
    let body = AgreementDocument {
        document,
        complete_set_signatures: serde_json::to_string(signatures)?,
    };
    let encoded = serde_json::to_vec(&body)?;
    Ok(digest_to_hex(&sha256_concat([encoded.as_slice()])))
}

/// Hash the selected supplier countersigns: `SHA-256(proposal || first signature)`.
pub fn countersign_hash(proposal: &str, first_signature: &str) -> [u8; 32] {
    sha256_concat([proposal.as_bytes(), first_signature.as_bytes()])
}

impl Participant {
    /// Parse and dispatch one inbound message. Failures are logged and
    /// counted here; [`Participant::run`] discards them.
    pub async fn handle_wire(&self, wire: &[u8]) -> Result<DispatchOutcome, EngineError> {
        self.counters.record_rx();
        let result = match parse_envelope(wire) {
            Ok(envelope) => self.dispatch(&envelope).await,
            Err(err) => Err(err),
        };
        match &result {
            Ok(DispatchOutcome::Ignored) => self.counters.record_dropped(),
            Ok(outcome) => debug!(?outcome, "dispatched"),
            Err(err) => {
                self.counters.record_failure();
                warn!(kind = err.kind(), error = %err, "dispatch failed");
            }
        }
        result
    }

    /// Drain `inbound` one message at a time until it closes or `cancel`
    /// fires.
    pub async fn run(&self, mut inbound: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken) {
        info!(address = %self.address(), "dispatch loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("dispatch loop cancelled");
                    break;
                }
                message = inbound.recv() => match message {
                    Some(wire) => {
                        let _ = self.handle_wire(&wire).await;
                    }
                    None => {
                        info!("inbound channel closed");
                        break;
                    }
                },
            }
        }
        let counters = self.counters();
        info!(
            rx = counters.rx,
            tx = counters.tx,
            failures = counters.failures,
            dropped = counters.dropped,
            "dispatch loop stopped"
        );
    }

    pub async fn dispatch(&self, envelope: &ProtocolEnvelope) -> Result<DispatchOutcome, EngineError> {
        let Some(message) = InboundMessage::decode(&envelope.opcode, &envelope.payload)? else {
            debug!(opcode = %envelope.opcode, sender = %envelope.sender, "ignoring opcode");
            return Ok(DispatchOutcome::Ignored);
        };

        self.authenticate(envelope).await?;
        debug!(
            opcode = %envelope.opcode,
            sender = %envelope.sender,
            message = message.name(),
            "dispatching"
        );

        match message {
            InboundMessage::Join(join) => self.on_join(join).await,
            InboundMessage::AvailabilityResponse(response) => {
                self.on_availability_response(&envelope.sender, response)
            }
            InboundMessage::AvailabilityRequest(request) => {
                self.on_availability_request(request).await
            }
            InboundMessage::NotifySelection(notice) => {
                self.on_notify_selection(&envelope.sender, notice).await
            }
            InboundMessage::RespondNotification(response) => {
                self.on_respond_notification(response).await
            }
        }
    }

    async fn authenticate(&self, envelope: &ProtocolEnvelope) -> Result<(), EngineError> {
        let sender = self
            .directory
            .resolve(&envelope.sender)
            .await
            .map_err(|err| match err {
                EngineError::NotFound(_) => {
                    EngineError::Unauthorized(format!("unknown sender {}", envelope.sender))
                }
                other => other,
            })?;
        verify_envelope(self.keys.as_ref(), &sender.signing_public_key, envelope).await
    }

    async fn on_join(&self, join: JoinPayload) -> Result<DispatchOutcome, EngineError> {
        let record = self.directory.resolve(&join.address).await?;

        let added = {
            let mut state = self.state.lock()?;
            let added = state.add_counterparty(&join.address);
            state.bearer_tokens.insert(
                record.messaging_endpoint.clone(),
                join.authorized_bearer_token,
            );
            if let Some(workflow) = join.workflow_identifier {
                state.workflow_id.get_or_insert(workflow);
            }
            added
        };

        info!(
            address = %join.address,
            endpoint = %record.messaging_endpoint,
            new = added,
            "counterparty joined"
        );
        Ok(DispatchOutcome::Joined {
            address: join.address,
            endpoint: record.messaging_endpoint,
        })
    }

    fn on_availability_response(
        &self,
        sender: &str,
        response: AvailabilityResponse,
    ) -> Result<DispatchOutcome, EngineError> {
        let availability: serde_json::Value = serde_json::from_str(&response.availability)?;
        self.state
            .lock()?
            .availability
            .insert(sender.to_string(), availability);
        info!(%sender, job = %response.id, "recorded supplier availability");
        Ok(DispatchOutcome::AvailabilityRecorded {
            sender: sender.to_string(),
        })
    }

    async fn on_availability_request(
        &self,
        request: AvailabilityRequest,
    ) -> Result<DispatchOutcome, EngineError> {
        let job = request.job()?;
        let meta = request.meta()?;
        let shield = meta.shield_addr.clone();
        let _guard = self.shield_locks.acquire(&shield).await?;

        let input = self.commitments.build(&job, &meta, None).await?;
        let built = input.commitment_hash()?;

        // one outstanding job per shield: the operator's leaf is the first one
        let stored = self
            .commitments
            .log()
            .get_leaves(&shield, 0, 1)
            .await?
            .into_iter()
            .next()
            .map(|leaf| normalize_hash(&leaf.hash));
        if stored.as_deref() != Some(built.as_str()) {
            warn!(%shield, %built, stored = ?stored, job = %job.id, "commitment mismatch, not answering");
            return Err(EngineError::CommitmentMismatch {
                shield,
                built,
                stored: stored.unwrap_or_else(|| "<empty>".into()),
            });
        }

        // the job's own supplier type narrows the configured ones
        let types = match &job.reqs.supplier_type {
            Some(wanted) => vec![wanted.clone()],
            None => self.config.supplier_types.clone(),
        };
        let eligible = self
            .availability
            .query(&types, job.tw, job.reqs.task_length)
            .await?;
        let Some(record) = eligible.into_iter().next() else {
            info!(%shield, job = %job.id, "no eligible supplier");
            return Ok(DispatchOutcome::NoEligibleSupplier);
        };

        let response = AvailabilityPayload::MatchJob(MatchJob::Response(AvailabilityResponse {
            id: request.id,
            date: record.date.to_string(),
            availability: serde_json::to_string(&record)?,
        }));
        let recipients = self.broadcast(Opcode::Availability, &response).await?;
        info!(%shield, job = %job.id, supplier = %record.supplier_id, recipients, "answered availability request");
        Ok(DispatchOutcome::AvailabilityAnswered { recipients })
    }

    async fn on_notify_selection(
        &self,
        sender: &str,
        mut notice: SelectionNotice,
    ) -> Result<DispatchOutcome, EngineError> {
        if !notice.status {
            info!(%sender, "not selected");
            self.hooks.on_selection_rejected(&notice).await;
            return Ok(DispatchOutcome::SelectionRejected);
        }

        let first = notice.signatures.first().cloned().ok_or_else(|| {
            EngineError::ProtocolViolation("selection notice carries no signature".into())
        })?;
        if !self.hooks.check_selection_notice(sender, &notice).await {
            return Err(EngineError::Unauthorized(format!(
                "selection notice from {} refused",
                sender
            )));
        }

        let countersignature = self
            .keys
            .sign(
                &self.config.signing_key_ref,
                &countersign_hash(&notice.proposal, &first),
            )
            .await?;
        notice.signatures.push(countersignature);

        let response = AvailabilityPayload::RespondNotification(NotificationResponse {
            init_signed_doc: notice.proposal,
            signature_collection: notice.signatures,
        });
        let recipients = self.broadcast(Opcode::Availability, &response).await?;
        info!(%sender, recipients, "countersigned selection proposal");
        Ok(DispatchOutcome::SelectionCountersigned { recipients })
    }

    async fn on_respond_notification(
        &self,
        response: NotificationResponse,
    ) -> Result<DispatchOutcome, EngineError> {
        if !self
            .hooks
            .check_signature_collection(&response.init_signed_doc, &response.signature_collection)
            .await
        {
            return Err(EngineError::ProtocolViolation(
                "signature collection rejected".into(),
            ));
        }

        let hash = agreement_hash(&response.init_signed_doc, &response.signature_collection)?;
        self.state.lock()?.agreements.push(hash.clone());
        self.hooks.on_agreement(&hash, &response).await;
        info!(agreement = %hash, signatures = response.signature_collection.len(), "baselined agreement");
        Ok(DispatchOutcome::AgreementRecorded {
            agreement_hash: hash,
        })
    }
}
