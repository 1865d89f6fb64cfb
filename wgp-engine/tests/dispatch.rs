mod common;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use common::{signed_wire, Workgroup};
use num_bigint::BigUint;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wgp_engine::{
    dispatch::{agreement_hash, countersign_hash},
    envelope::{parse_envelope, Opcode},
    keys::public_key_for_seed,
    payload::{AvailabilityPayload, NotificationResponse, SelectionNotice},
    DispatchOutcome, EngineError, KeyCustody, LocalKeyCustody, ProtocolHooks, WorkgroupInvite,
};
use wgp_common::{sha256_concat, Job, SupplierType, TimeWindow};
use wgp_test_fixtures::{
    golden, sample_job, sample_meta, JOB_END, JOB_START, JOB_TASK_LENGTH, OPERATOR_ADDRESS,
    OPERATOR_ENDPOINT, OPERATOR_SEED, SHIELD_ADDRESS, SUPPLIER_ADDRESS, SUPPLIER_ENDPOINT,
    SUPPLIER_SEED, WORKFLOW_ID,
};

#[tokio::test]
async fn join_adds_counterparty_and_token() {
    let group = Workgroup::new();
    let wire = signed_wire(
        SUPPLIER_SEED,
        SUPPLIER_ADDRESS,
        Opcode::Join,
        &json!({"address": "0xabc", "authorized_bearer_token": "tok1"}),
    )
    .await;

    let outcome = group.operator.handle_wire(&wire).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Joined {
            address: "0xabc".into(),
            endpoint: SUPPLIER_ENDPOINT.into()
        }
    );

    let state = group.operator.state().unwrap();
    assert_eq!(state.counterparties, vec!["0xabc".to_string()]);
    assert_eq!(state.bearer_tokens[SUPPLIER_ENDPOINT], "tok1");

    // joining twice does not duplicate the counterparty
    group.operator.handle_wire(&wire).await.unwrap();
    assert_eq!(group.operator.state().unwrap().counterparties.len(), 1);
}

#[tokio::test]
async fn join_for_unknown_address_is_rejected() {
    let group = Workgroup::new();
    let wire = signed_wire(
        SUPPLIER_SEED,
        SUPPLIER_ADDRESS,
        Opcode::Join,
        &json!({"address": "0xnowhere", "authorized_bearer_token": "tok1"}),
    )
    .await;

    let err = group.operator.handle_wire(&wire).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(group.operator.state().unwrap().counterparties.is_empty());
}

#[tokio::test]
async fn invite_handshake_connects_both_sides() {
    let group = Workgroup::joined().await;

    let operator = group.operator.state().unwrap();
    assert_eq!(operator.counterparties, vec![SUPPLIER_ADDRESS.to_string()]);
    let supplier_token = &operator.bearer_tokens[SUPPLIER_ENDPOINT];
    assert!(group.supplier.authorized_tokens().contains(supplier_token));

    let supplier = group.supplier.state().unwrap();
    assert_eq!(supplier.counterparties, vec![OPERATOR_ADDRESS.to_string()]);
    assert_eq!(supplier.shield_address.as_deref(), Some(SHIELD_ADDRESS));
    let operator_token = &supplier.bearer_tokens[OPERATOR_ENDPOINT];
    assert!(group.operator.authorized_tokens().contains(operator_token));

    assert_eq!(group.supplier.counters().tx, 1);
    assert_eq!(group.operator.counters().rx, 1);
}

#[tokio::test]
async fn create_invite_vends_a_token_for_the_bound_workflow() {
    let group = Workgroup::new();

    let invite = group.operator.create_invite().unwrap();
    assert_eq!(invite.invitor_address, OPERATOR_ADDRESS);
    assert_eq!(invite.shield_address, SHIELD_ADDRESS);
    assert_eq!(invite.workflow_id, WORKFLOW_ID);
    assert!(group
        .operator
        .authorized_tokens()
        .contains(&invite.authorized_bearer_token));

    let claims = json!({"prvd": {"data": {"params": serde_json::to_value(&invite).unwrap()}}});
    assert_eq!(WorkgroupInvite::from_claims(&claims).unwrap(), invite);

    // the supplier is not bound to a shield until it accepts an invite
    let err = group.supplier.create_invite().unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[tokio::test]
async fn genesis_request_is_answered_with_availability() {
    let group = Workgroup::joined().await;
    let job = sample_job("job-1");
    let meta = sample_meta(0);

    let receipt = group
        .operator
        .commit_workflow_state(&job, &meta, None)
        .await
        .unwrap();
    assert_eq!(receipt.commitment_hash, golden::GENESIS_JOB_1);
    assert_eq!(receipt.verifier_input.lc1, BigUint::default());
    assert_eq!(receipt.verifier_input.lc2, BigUint::default());

    assert_eq!(group.operator.request_availability(&job, &meta).await.unwrap(), 1);
    let request = group.take_single(SUPPLIER_ENDPOINT);
    let outcome = group.supplier.handle_wire(&request.wire).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::AvailabilityAnswered { recipients: 1 });

    let response = group.take_single(OPERATOR_ENDPOINT);
    let outcome = group.operator.handle_wire(&response.wire).await.unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::AvailabilityRecorded {
            sender: SUPPLIER_ADDRESS.into()
        }
    );

    let state = group.operator.state().unwrap();
    assert_eq!(state.availability[SUPPLIER_ADDRESS]["supplierId"], "tech-1");
    assert!(state.workflow_records.contains_key("job-1"));
}

#[tokio::test]
async fn commitment_mismatch_sends_nothing() {
    let group = Workgroup::joined().await;
    group.log.seed_leaf(SHIELD_ADDRESS, golden::GENESIS_JOB_42).await;

    let job = sample_job("job-1");
    group
        .operator
        .request_availability(&job, &sample_meta(0))
        .await
        .unwrap();
    let request = group.take_single(SUPPLIER_ENDPOINT);

    let before = group.supplier.counters();
    let err = group.supplier.handle_wire(&request.wire).await.unwrap_err();
    match err {
        EngineError::CommitmentMismatch { built, stored, .. } => {
            assert_eq!(built, golden::GENESIS_JOB_1);
            assert_eq!(stored, golden::GENESIS_JOB_42);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert!(group.transport.published().is_empty());
    let after = group.supplier.counters();
    assert_eq!(after.tx, before.tx);
    assert_eq!(after.failures, before.failures + 1);
}

#[tokio::test]
async fn no_eligible_supplier_sends_nothing() {
    let group = Workgroup::joined().await;
    let meta = sample_meta(0);
    group
        .operator
        .commit_workflow_state(&sample_job("job-1"), &meta, None)
        .await
        .unwrap();

    let long_job = Job::new(
        "job-1",
        TimeWindow::new(JOB_START, JOB_END),
        4 * JOB_TASK_LENGTH,
    );
    group.operator.request_availability(&long_job, &meta).await.unwrap();
    let request = group.take_single(SUPPLIER_ENDPOINT);

    let outcome = group.supplier.handle_wire(&request.wire).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::NoEligibleSupplier);
    assert!(group.transport.published().is_empty());
}

#[tokio::test]
async fn job_supplier_type_overrides_configured_types() {
    let group = Workgroup::joined().await;
    let meta = sample_meta(0);
    group
        .operator
        .commit_workflow_state(&sample_job("job-1"), &meta, None)
        .await
        .unwrap();

    let mut job = sample_job("job-1");
    job.reqs.supplier_type = Some(SupplierType("ELECTRICIAN".into()));
    group.operator.request_availability(&job, &meta).await.unwrap();
    let request = group.take_single(SUPPLIER_ENDPOINT);
    let outcome = group.supplier.handle_wire(&request.wire).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::AvailabilityAnswered { recipients: 1 });

    let response = group.take_single(OPERATOR_ENDPOINT);
    group.operator.handle_wire(&response.wire).await.unwrap();
    let state = group.operator.state().unwrap();
    assert_eq!(state.availability[SUPPLIER_ADDRESS]["supplierId"], "elec-1");
    assert_eq!(state.availability[SUPPLIER_ADDRESS]["supplierType"], "ELECTRICIAN");
}

#[tokio::test]
async fn accepted_selection_is_countersigned_and_baselined() {
    let group = Workgroup::joined().await;
    let proposal = "master-services-agreement-v1";

    group
        .operator
        .notify_selection(SUPPLIER_ADDRESS, proposal, true, Some(0))
        .await
        .unwrap();
    let notice = group.take_single(SUPPLIER_ENDPOINT);
    let outcome = group.supplier.handle_wire(&notice.wire).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::SelectionCountersigned { recipients: 1 });

    let forwarded = group.take_single(OPERATOR_ENDPOINT);
    let envelope = parse_envelope(&forwarded.wire).unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&envelope.payload).unwrap();
    assert!(payload["RN"]["signatureCollection"].is_string());
    let response: NotificationResponse = serde_json::from_value(payload["RN"].clone()).unwrap();
    assert_eq!(response.init_signed_doc, proposal);
    assert_eq!(response.signature_collection.len(), 2);

    let keys = LocalKeyCustody::new();
    let [first, second] = [&response.signature_collection[0], &response.signature_collection[1]];
    assert!(keys
        .verify(
            &public_key_for_seed(&OPERATOR_SEED),
            &sha256_concat([proposal.as_bytes()]),
            first
        )
        .await
        .unwrap());
    assert!(keys
        .verify(
            &public_key_for_seed(&SUPPLIER_SEED),
            &countersign_hash(proposal, first),
            second
        )
        .await
        .unwrap());

    let outcome = group.operator.handle_wire(&forwarded.wire).await.unwrap();
    let expected = agreement_hash(proposal, &response.signature_collection).unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::AgreementRecorded {
            agreement_hash: expected.clone()
        }
    );
    assert_eq!(group.operator.state().unwrap().agreements, vec![expected]);
}

#[derive(Default)]
struct RecordingHooks {
    rejected: AtomicBool,
}

#[async_trait]
impl ProtocolHooks for RecordingHooks {
    async fn on_selection_rejected(&self, _notice: &SelectionNotice) {
        self.rejected.store(true, Ordering::SeqCst);
    }

    async fn check_signature_collection(&self, _document: &str, signatures: &[String]) -> bool {
        signatures.len() >= 2
    }
}

#[tokio::test]
async fn rejected_selection_only_runs_the_hook() {
    let hooks = Arc::new(RecordingHooks::default());
    let group = Workgroup::joined_with_supplier_hooks(Some(hooks.clone())).await;

    group
        .operator
        .notify_selection(SUPPLIER_ADDRESS, "proposal", false, None)
        .await
        .unwrap();
    let notice = group.take_single(SUPPLIER_ENDPOINT);

    let outcome = group.supplier.handle_wire(&notice.wire).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::SelectionRejected);
    assert!(hooks.rejected.load(Ordering::SeqCst));
    assert!(group.transport.published().is_empty());
}

#[tokio::test]
async fn incomplete_signature_collection_is_refused_by_hook() {
    let hooks = Arc::new(RecordingHooks::default());
    let group = Workgroup::with_supplier_hooks(Some(hooks));
    let payload = AvailabilityPayload::RespondNotification(NotificationResponse {
        init_signed_doc: "doc".into(),
        signature_collection: vec!["only-one".into()],
    });
    let wire = signed_wire(
        OPERATOR_SEED,
        OPERATOR_ADDRESS,
        Opcode::Availability,
        &serde_json::to_value(&payload).unwrap(),
    )
    .await;

    let err = group.supplier.handle_wire(&wire).await.unwrap_err();
    assert!(matches!(err, EngineError::ProtocolViolation(_)));
    assert!(group.supplier.state().unwrap().agreements.is_empty());
}

/// Accepted selection from the operator whose proposal signature was made
/// with the supplier's key.
async fn forged_notice_wire() -> Vec<u8> {
    let forged = LocalKeyCustody::with_seed("k", SUPPLIER_SEED)
        .sign("k", &sha256_concat([b"proposal".as_slice()]))
        .await
        .unwrap();
    let notice = json!({"NS": {"status": true, "proposal": "proposal", "signatures": [forged]}});
    signed_wire(OPERATOR_SEED, OPERATOR_ADDRESS, Opcode::Availability, &notice).await
}

#[tokio::test]
async fn proposal_signature_is_not_checked_by_default() {
    let group = Workgroup::joined().await;
    let wire = forged_notice_wire().await;

    let outcome = group.supplier.handle_wire(&wire).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::SelectionCountersigned { recipients: 1 });
    group.take_single(OPERATOR_ENDPOINT);
}

/// Countersigns only proposals signed by the operator's key.
struct OperatorSignatureHooks;

#[async_trait]
impl ProtocolHooks for OperatorSignatureHooks {
    async fn check_selection_notice(&self, _sender: &str, notice: &SelectionNotice) -> bool {
        let Some(first) = notice.signatures.first() else {
            return false;
        };
        LocalKeyCustody::new()
            .verify(
                &public_key_for_seed(&OPERATOR_SEED),
                &sha256_concat([notice.proposal.as_bytes()]),
                first,
            )
            .await
            .unwrap_or(false)
    }
}

#[tokio::test]
async fn selection_hook_can_refuse_forged_proposal_signature() {
    let group = Workgroup::joined_with_supplier_hooks(Some(Arc::new(OperatorSignatureHooks))).await;
    let wire = forged_notice_wire().await;

    let err = group.supplier.handle_wire(&wire).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));
    assert!(group.transport.published().is_empty());

    group
        .operator
        .notify_selection(SUPPLIER_ADDRESS, "proposal", true, None)
        .await
        .unwrap();
    let notice = group.take_single(SUPPLIER_ENDPOINT);
    let outcome = group.supplier.handle_wire(&notice.wire).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::SelectionCountersigned { recipients: 1 });
}

#[tokio::test]
async fn envelopes_must_verify_against_the_sender() {
    let group = Workgroup::new();
    let join = json!({"address": SUPPLIER_ADDRESS, "authorized_bearer_token": "tok1"});

    // operator key claiming to be the supplier
    let wire = signed_wire(OPERATOR_SEED, SUPPLIER_ADDRESS, Opcode::Join, &join).await;
    let err = group.operator.handle_wire(&wire).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    let wire = signed_wire(SUPPLIER_SEED, "0xstranger", Opcode::Join, &join).await;
    let err = group.operator.handle_wire(&wire).await.unwrap_err();
    assert!(matches!(err, EngineError::Unauthorized(_)));

    assert!(group.operator.state().unwrap().counterparties.is_empty());
    assert_eq!(group.operator.counters().failures, 2);
}

#[tokio::test]
async fn unhandled_opcodes_are_ignored() {
    let group = Workgroup::new();
    let wire = signed_wire(SUPPLIER_SEED, SUPPLIER_ADDRESS, Opcode::Sync, &json!({"any": 1})).await;
    let outcome = group.operator.handle_wire(&wire).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Ignored);
    let counters = group.operator.counters();
    assert_eq!((counters.dropped, counters.failures), (1, 0));
}

#[tokio::test]
async fn bad_messages_do_not_block_the_loop() {
    let group = Workgroup::new();
    let (tx, rx) = mpsc::channel(8);

    tx.send(b"garbage".to_vec()).await.unwrap();
    tx.send(signed_wire(SUPPLIER_SEED, SUPPLIER_ADDRESS, Opcode::Join, &json!({"address": 5})).await)
        .await
        .unwrap();
    tx.send(
        signed_wire(
            SUPPLIER_SEED,
            SUPPLIER_ADDRESS,
            Opcode::Availability,
            &json!({"MJ": {"id": "1", "intention": "1", "availability": "{not json"}}),
        )
        .await,
    )
    .await
    .unwrap();
    tx.send(
        signed_wire(
            SUPPLIER_SEED,
            SUPPLIER_ADDRESS,
            Opcode::Join,
            &json!({"address": SUPPLIER_ADDRESS, "authorized_bearer_token": "tok1"}),
        )
        .await,
    )
    .await
    .unwrap();
    drop(tx);

    group.operator.run(rx, CancellationToken::new()).await;

    let counters = group.operator.counters();
    assert_eq!(counters.rx, 4);
    assert_eq!(counters.failures, 3);
    assert_eq!(
        group.operator.state().unwrap().counterparties,
        vec![SUPPLIER_ADDRESS.to_string()]
    );
}

#[tokio::test]
async fn run_stops_when_cancelled() {
    let group = Workgroup::new();
    let (_tx, rx) = mpsc::channel::<Vec<u8>>(1);
    let cancel = CancellationToken::new();
    cancel.cancel();
    group.operator.run(rx, cancel).await;
    assert_eq!(group.operator.counters().rx, 0);
}
