#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use wgp_commitment::MemoryCommitLog;
use wgp_engine::{
    config::DEFAULT_SIGNING_KEY_REF,
    envelope::{build_envelope, marshal_envelope, EnvelopeHeader, Opcode},
    keys::public_key_for_seed,
    transport::Published,
    CalendarAvailability, Collaborators, LocalKeyCustody, MemoryTransport, OrganizationRecord,
    Participant, ParticipantConfig, ProtocolHooks, StaticDirectory,
};
use wgp_prover::{CircuitConfig, MockCircuitBackend, ProofPipeline};
use wgp_test_fixtures::{
    sample_calendar_json, write_circuit_dir, OPERATOR_ADDRESS, OPERATOR_ENDPOINT, OPERATOR_SEED,
    SHIELD_ADDRESS, SUPPLIER_ADDRESS, SUPPLIER_ENDPOINT, SUPPLIER_SEED, WORKFLOW_ID,
};

pub struct Workgroup {
    pub directory: Arc<StaticDirectory>,
    pub transport: Arc<MemoryTransport>,
    pub log: Arc<MemoryCommitLog>,
    pub operator: Participant,
    pub supplier: Participant,
    _circuit_dir: TempDir,
}

pub fn organization(address: &str, endpoint: &str, seed: &[u8; 32]) -> OrganizationRecord {
    OrganizationRecord {
        address: address.into(),
        name: address.into(),
        messaging_endpoint: endpoint.into(),
        signing_public_key: public_key_for_seed(seed),
        zk_public_key: None,
    }
}

fn participant(
    address: &str,
    endpoint: &str,
    seed: [u8; 32],
    directory: &Arc<StaticDirectory>,
    transport: &Arc<MemoryTransport>,
    log: &Arc<MemoryCommitLog>,
    prover: &Arc<ProofPipeline>,
    shield: Option<&str>,
) -> Participant {
    let mut config = ParticipantConfig::new(address, endpoint);
    config.organization_name = address.into();
    config.shield_address = shield.map(str::to_string);
    config.workflow_id = shield.map(|_| WORKFLOW_ID.to_string());

    let calendar: Vec<wgp_engine::AvailabilityRecord> =
        serde_json::from_value(sample_calendar_json()).unwrap();

    Participant::new(
        config,
        Collaborators {
            directory: directory.clone(),
            keys: Arc::new(LocalKeyCustody::with_seed(DEFAULT_SIGNING_KEY_REF, seed)),
            transport: transport.clone(),
            commit_log: log.clone(),
            availability: Arc::new(CalendarAvailability::new(calendar)),
            prover: Some(prover.clone()),
        },
    )
    .unwrap()
}

impl Workgroup {
    /// Operator and supplier registered in a shared directory, not yet
    /// connected.
    pub fn new() -> Self {
        Self::with_supplier_hooks(None)
    }

    pub fn with_supplier_hooks(hooks: Option<Arc<dyn ProtocolHooks>>) -> Self {
        let circuit_dir = tempfile::tempdir().unwrap();
        write_circuit_dir(circuit_dir.path(), true).unwrap();
        let prover = Arc::new(ProofPipeline::new(
            CircuitConfig::with_dir(circuit_dir.path()),
            Arc::new(MockCircuitBackend::new()),
        ));

        let directory = Arc::new(StaticDirectory::from_records([
            organization(OPERATOR_ADDRESS, OPERATOR_ENDPOINT, &OPERATOR_SEED),
            organization(SUPPLIER_ADDRESS, SUPPLIER_ENDPOINT, &SUPPLIER_SEED),
        ]));
        let transport = Arc::new(MemoryTransport::new());
        let log = Arc::new(MemoryCommitLog::tracking(SHIELD_ADDRESS));

        let operator = participant(
            OPERATOR_ADDRESS,
            OPERATOR_ENDPOINT,
            OPERATOR_SEED,
            &directory,
            &transport,
            &log,
            &prover,
            Some(SHIELD_ADDRESS),
        );
        let mut supplier = participant(
            SUPPLIER_ADDRESS,
            SUPPLIER_ENDPOINT,
            SUPPLIER_SEED,
            &directory,
            &transport,
            &log,
            &prover,
            None,
        );
        if let Some(hooks) = hooks {
            supplier = supplier.with_hooks(hooks);
        }

        Self {
            directory,
            transport,
            log,
            operator,
            supplier,
            _circuit_dir: circuit_dir,
        }
    }

    /// Supplier accepts the operator's invite and the operator processes the
    /// resulting `JOIN`.
    pub async fn joined() -> Self {
        Self::joined_with_supplier_hooks(None).await
    }

    pub async fn joined_with_supplier_hooks(hooks: Option<Arc<dyn ProtocolHooks>>) -> Self {
        let group = Self::with_supplier_hooks(hooks);
        let invite = group.operator.create_invite().unwrap();
        group.supplier.accept_invite(invite).await.unwrap();

        let join = group.take_single(OPERATOR_ENDPOINT);
        group.operator.handle_wire(&join.wire).await.unwrap();
        group
    }

    /// The only message published since the last take; it must be addressed
    /// to `endpoint`.
    pub fn take_single(&self, endpoint: &str) -> Published {
        let mut published = self.transport.take_published();
        assert_eq!(published.len(), 1, "expected exactly one publish: {:?}", published);
        let message = published.remove(0);
        assert_eq!(message.endpoint, endpoint);
        message
    }
}

/// A wire message from `sender`, signed with `seed`.
pub async fn signed_wire(seed: [u8; 32], sender: &str, opcode: Opcode, payload: &Value) -> Vec<u8> {
    let keys = LocalKeyCustody::with_seed("test", seed);
    let envelope = build_envelope(
        &keys,
        "test",
        opcode,
        EnvelopeHeader {
            sender,
            recipient: "",
            shield_address: SHIELD_ADDRESS,
            workflow_id: WORKFLOW_ID,
        },
        serde_json::to_vec(payload).unwrap(),
    )
    .await
    .unwrap();
    marshal_envelope(&envelope).unwrap()
}
