//! Submit-and-verify scenarios
//!
//! Covers:
//! - Spawn, invoke and delete observed through verified proofs
//! - Failover across unreachable and silent members
//! - Tampered proofs rejected as authenticity failures, never retried
//! - Rejection, ambiguous submission, inclusion timeout and cancellation
//! - Inclusion only counted when it shows after submission

use ed25519_dalek::SigningKey;
use quorum_network::{
    Connection, ConnectionConfig, LeaderConnection, NodeConnection, NodeFault, PublicKey, RosterConnection,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::mock_ledger::{Inclusion, MockLedger, Tamper, CHAIN_ID, POLICY};
use crate::config::RpcConfig;
use crate::error::{RpcError, SignatureError, TransactionError, VerificationError};
use crate::instance::InstanceId;
use crate::instruction::{Argument, Instruction};
use crate::rpc::{LedgerRpc, Stage};
use crate::signer::Signer;
use crate::transaction::{ClientTransaction, TransactionBuilder};

/// Instance authorising spawns; the simulated ledger does not check it
const AUTHORITY: InstanceId = InstanceId([0xda; 32]);

fn user() -> SigningKey {
    SigningKey::from_bytes(&[0xa1; 32])
}

fn value(bytes: &[u8]) -> Vec<Argument> {
    vec![Argument::new("value", bytes.to_vec())]
}

/// Fetch counters from the ledger, then fill and sign
async fn build<C: Connection>(
    rpc: &LedgerRpc<C>,
    signer: &SigningKey,
    instructions: Vec<Instruction>,
) -> ClientTransaction {
    let pk = signer.public_key();
    let latest = rpc.get_signer_counters(&[pk]).await.unwrap();
    instructions
        .into_iter()
        .fold(TransactionBuilder::new(), |b, i| b.add(i.with_signer(pk)))
        .fill_and_sign(&latest, &[signer])
        .unwrap()
}

async fn spawn_value(rpc: &LedgerRpc, signer: &SigningKey, data: &[u8]) -> InstanceId {
    let tx = build(rpc, signer, vec![Instruction::spawn(AUTHORITY, "value", value(data))]).await;
    rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap().instance_id
}

#[tokio::test]
async fn test_spawn_is_observed_in_verified_state() {
    let ledger = MockLedger::new(4);
    ledger.set_inclusion(Inclusion::AfterProofRequests(3));
    let rpc = ledger.rpc();
    let alice = user();

    let tx = build(&rpc, &alice, vec![Instruction::spawn(AUTHORITY, "value", value(b"hello"))]).await;
    let expected_id = tx.instructions()[0].derive_id("");
    let outcome = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.instance_id, expected_id);
    assert_eq!(outcome.tx_hash, tx.hash());
    assert_eq!(outcome.height, 1);
    assert_eq!(outcome.polls, 3);
    let body = outcome.state.state.unwrap();
    assert_eq!(body.version, 0);
    assert_eq!(body.value, b"hello".to_vec());
    assert_eq!(body.policy_id, POLICY);
    assert_eq!(ledger.counter(&alice.public_key()), 1);
}

#[tokio::test]
async fn test_invoke_then_delete() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let alice = user();
    let id = spawn_value(&rpc, &alice, b"v0").await;

    let update = Instruction::invoke(id, "value", "update", value(b"v1"));
    let tx = build(&rpc, &alice, vec![update]).await;
    assert_eq!(tx.instructions()[0].signer_counters(), &[2]);
    let outcome = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.state.version(), Some(1));

    let instance = rpc.get_instance(&id).await.unwrap().unwrap();
    assert_eq!(instance.data, b"v1".to_vec());
    assert_eq!(instance.contract_id, "value");
    assert_eq!(instance.height, 2);

    let tx = build(&rpc, &alice, vec![Instruction::delete(id, "value")]).await;
    let outcome = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap();
    assert!(!outcome.state.is_present());
    assert_eq!(rpc.get_instance(&id).await.unwrap(), None);
    assert_eq!(ledger.counter(&alice.public_key()), 3);
}

#[tokio::test]
async fn test_batch_applies_in_order() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let alice = user();
    let id = spawn_value(&rpc, &alice, b"a").await;

    let tx = build(
        &rpc,
        &alice,
        vec![
            Instruction::invoke(id, "value", "update", value(b"b")),
            Instruction::invoke(id, "value", "update", value(b"c")),
        ],
    )
    .await;
    assert_eq!(tx.instructions()[1].signer_counters(), &[3]);

    let outcome = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap();
    let body = outcome.state.state.unwrap();
    assert_eq!(body.version, 2);
    assert_eq!(body.value, b"c".to_vec());
}

#[tokio::test]
async fn test_fails_over_to_third_member() {
    let ledger = MockLedger::new(4);
    ledger.set_fault(0, NodeFault::Unreachable);
    ledger.set_fault(1, NodeFault::Silent);
    let rpc = ledger.rpc_with(
        ConnectionConfig {
            timeout_ms: 50,
            max_attempts: Some(4),
            retry_delay_ms: 0,
        },
        RpcConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
    );

    let id = spawn_value(&rpc, &user(), b"x").await;
    assert_eq!(rpc.connection().leader_index(), 2);
    assert_eq!(ledger.get(&id).unwrap().value, b"x".to_vec());

    // Later calls stick with the new leader
    let before = ledger.dialer.dial_count(&MockLedger::address(0));
    rpc.get_proof(&id).await.unwrap();
    assert_eq!(ledger.dialer.dial_count(&MockLedger::address(0)), before);
}

#[tokio::test]
async fn test_tampered_proofs_are_authenticity_failures() {
    let cases = [
        (Tamper::FlipLeafValue, "leaf"),
        (Tamper::FlipSibling, "sibling"),
        (Tamper::ForgeRoot, "forged root"),
    ];
    for (tamper, name) in cases {
        let ledger = MockLedger::new(4);
        let rpc = ledger.rpc();
        let id = spawn_value(&rpc, &user(), b"secret").await;
        ledger.set_tamper(0, tamper);

        let err = rpc.get_proof(&id).await.unwrap_err();
        assert!(
            matches!(err, RpcError::Authenticity(VerificationError::RootMismatch { .. })),
            "{}: {:?}",
            name,
            err
        );
        // Not treated as a transport failure: no other member was asked
        for member in 1..4 {
            assert!(!ledger
                .dialer
                .delivered(&MockLedger::address(member))
                .contains(&"Ledger/GetProof".to_string()));
        }
    }
}

#[tokio::test]
async fn test_weak_signature_is_rejected() {
    let ledger = MockLedger::new(4);
    ledger.set_tamper(0, Tamper::WeakSignature);
    let err = ledger.rpc().get_chain_config().await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::Authenticity(VerificationError::Signature(SignatureError::BelowThreshold {
            valid: 2,
            required: 3
        }))
    ));
}

#[tokio::test]
async fn test_exclusion_proof_for_unknown_instance() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let state = rpc.get_proof(&InstanceId([0x42; 32])).await.unwrap();
    assert!(!state.is_present());
    assert_eq!(state.height, 0);
}

#[tokio::test]
async fn test_chain_config_matches_roster() {
    let ledger = MockLedger::new(4);
    let config = ledger.rpc().get_chain_config().await.unwrap();
    assert_eq!(config.block_interval_ms, 1_000);
    assert_eq!(config.roster, *ledger.roster);
    assert_eq!(config.roster.collective_key(), ledger.roster.collective_key());
}

#[tokio::test]
async fn test_repeated_proof_fetch_is_stable() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let id = spawn_value(&rpc, &user(), b"same").await;
    let leader = rpc.connection().leader_index();

    let first = rpc.get_proof(&id).await.unwrap();
    let second = rpc.get_proof(&id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(rpc.connection().leader_index(), leader);
    assert_eq!(rpc.connection().stats().leader_changes, 0);
}

#[tokio::test]
async fn test_stale_height_is_rejected() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let err = rpc.get_proof_at(&InstanceId::CONFIG, 5).await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::Authenticity(VerificationError::StaleState { required: 5, found: 0 })
    ));

    spawn_value(&rpc, &user(), b"x").await;
    let genesis = rpc.get_proof_at(&InstanceId::CONFIG, 0).await.unwrap();
    assert_eq!(genesis.height, 0);
}

#[tokio::test]
async fn test_ledger_rejects_wrong_counter() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let alice = user();

    let tx = TransactionBuilder::new()
        .add(Instruction::spawn(AUTHORITY, "value", value(b"x")).with_signer(alice.public_key()))
        .fill_and_sign(&HashMap::from([(alice.public_key(), 4)]), &[&alice])
        .unwrap();
    let err = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Rejected(_)));
    assert_eq!(ledger.height(), 0);
}

#[tokio::test]
async fn test_repeated_counter_never_leaves_the_client() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let pk = user().public_key();

    let tx = ClientTransaction::from_instructions(vec![
        Instruction::spawn(AUTHORITY, "value", value(b"a")).with_signer_counter(pk, 5),
        Instruction::spawn(AUTHORITY, "value", value(b"b")).with_signer_counter(pk, 5),
    ]);
    let err = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::InvalidTransaction(TransactionError::NonSequentialCounter { index: 1, .. })
    ));
    for member in 0..4 {
        assert!(ledger.dialer.delivered(&MockLedger::address(member)).is_empty());
    }
}

#[tokio::test]
async fn test_lost_submission_is_indeterminate() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let alice = user();
    let tx = build(&rpc, &alice, vec![Instruction::spawn(AUTHORITY, "value", value(b"x"))]).await;

    ledger.lose_replies(0);
    let err = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Indeterminate(_)), "{:?}", err);

    for member in 1..4 {
        assert!(!ledger
            .dialer
            .delivered(&MockLedger::address(member))
            .contains(&"Ledger/AddTx".to_string()));
    }
    // The ledger did apply it, which is why the client must not resend
    assert_eq!(ledger.applied(), 1);
}

fn single_node(ledger: &MockLedger, member: usize) -> LedgerRpc<NodeConnection> {
    let node = NodeConnection::new(
        ledger.roster.list()[member].clone(),
        Arc::new(ledger.dialer.clone()),
        Duration::from_millis(100),
    );
    LedgerRpc::new(
        Arc::new(node),
        ledger.roster.clone(),
        CHAIN_ID,
        RpcConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_lost_submission_to_single_node_is_indeterminate() {
    let ledger = MockLedger::new(4);
    let rpc = single_node(&ledger, 0);
    let alice = user();
    let tx = build(&rpc, &alice, vec![Instruction::spawn(AUTHORITY, "value", value(b"x"))]).await;

    ledger.lose_replies(0);
    let err = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Indeterminate(_)), "{:?}", err);
    assert_eq!(ledger.applied(), 1);
}

#[tokio::test]
async fn test_dropped_submission_to_single_node_is_indeterminate() {
    let ledger = MockLedger::new(4);
    let rpc = single_node(&ledger, 0);
    let tx = build(&rpc, &user(), vec![Instruction::spawn(AUTHORITY, "value", value(b"x"))]).await;

    ledger.set_fault(0, NodeFault::DropAfterSend);
    let err = rpc.submit(&tx).await.unwrap_err();
    assert!(matches!(err, RpcError::Indeterminate(_)), "{:?}", err);
    assert!(ledger
        .dialer
        .delivered(&MockLedger::address(0))
        .contains(&"Ledger/AddTx".to_string()));

    // Refused before anything was sent: safe to report as unreachable
    ledger.set_fault(0, NodeFault::Unreachable);
    let err = rpc.submit(&tx).await.unwrap_err();
    assert!(matches!(err, RpcError::Unreachable(_)), "{:?}", err);
}

#[tokio::test]
async fn test_unreachable_leader_is_not_ambiguous() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let alice = user();
    let tx = build(&rpc, &alice, vec![Instruction::spawn(AUTHORITY, "value", value(b"x"))]).await;

    ledger.set_fault(0, NodeFault::Unreachable);
    rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap();
    assert_eq!(ledger.applied(), 1);
}

#[tokio::test]
async fn test_inclusion_timeout() {
    let ledger = MockLedger::new(4);
    ledger.set_inclusion(Inclusion::Never);
    let rpc = ledger.rpc_with(
        ConnectionConfig::default(),
        RpcConfig {
            poll_interval_ms: 10,
            max_wait_ms: 100,
            ..Default::default()
        },
    );
    let tx = build(&rpc, &user(), vec![Instruction::spawn(AUTHORITY, "value", value(b"x"))]).await;

    let err = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap_err();
    match err {
        RpcError::InclusionTimeout { waited_ms } => assert!(waited_ms >= 100),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_poll_cannot_outlast_inclusion_budget() {
    let ledger = MockLedger::new(4);
    ledger.set_inclusion(Inclusion::Never);
    let rpc = ledger.rpc_with(
        ConnectionConfig {
            timeout_ms: 10_000,
            ..Default::default()
        },
        RpcConfig {
            poll_interval_ms: 10,
            max_wait_ms: 200,
            ..Default::default()
        },
    );
    let tx = build(&rpc, &user(), vec![Instruction::spawn(AUTHORITY, "value", value(b"x"))]).await;

    // Once the submission is in, every member stops answering
    let dialer = ledger.dialer.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        for member in 0..4 {
            dialer.set_fault(&MockLedger::address(member), NodeFault::Silent);
        }
    });

    let started = std::time::Instant::now();
    let err = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::InclusionTimeout { .. }), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cancellation_stops_waiting() {
    let ledger = MockLedger::new(4);
    ledger.set_inclusion(Inclusion::Never);
    let rpc = ledger.rpc_with(
        ConnectionConfig::default(),
        RpcConfig {
            poll_interval_ms: 20,
            max_wait_ms: 60_000,
            ..Default::default()
        },
    );
    let tx = build(&rpc, &user(), vec![Instruction::spawn(AUTHORITY, "value", value(b"x"))]).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = rpc.submit_and_wait(&tx, &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::Cancelled {
            stage: Stage::AwaitingInclusion
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(5));

    // Shared connection state is still usable
    assert!(rpc.get_proof(&InstanceId::CONFIG).await.is_ok());
}

#[tokio::test]
async fn test_ledger_side_inclusion_skips_polling_delay() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc_with(
        ConnectionConfig::default(),
        RpcConfig {
            poll_interval_ms: 60_000,
            inclusion_wait_blocks: 1,
            ..Default::default()
        },
    );
    let tx = build(&rpc, &user(), vec![Instruction::spawn(AUTHORITY, "value", value(b"x"))]).await;

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        rpc.submit_and_wait(&tx, &CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(outcome.polls, 1);
    assert_eq!(outcome.height, 1);
}

#[tokio::test]
async fn test_leader_connection_drives_the_same_flow() {
    let ledger = MockLedger::new(4);
    let roster_conn = Arc::new(RosterConnection::new(
        ledger.roster.clone(),
        Arc::new(ledger.dialer.clone()),
        ConnectionConfig {
            timeout_ms: 100,
            ..Default::default()
        },
    ));
    let conn = Arc::new(LeaderConnection::with_leader(roster_conn, 3));
    let rpc = LedgerRpc::new(
        conn,
        ledger.roster.clone(),
        CHAIN_ID,
        RpcConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
    );
    ledger.set_fault(3, NodeFault::Unreachable);

    let alice = user();
    let latest = rpc.get_signer_counters(&[alice.public_key()]).await.unwrap();
    assert_eq!(rpc.connection().leader_index(), 0);

    let tx = TransactionBuilder::new()
        .add(Instruction::spawn(AUTHORITY, "value", value(b"y")).with_signer(alice.public_key()))
        .fill_and_sign(&latest, &[&alice])
        .unwrap();
    let outcome = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap();
    assert!(outcome.state.is_present());
}

#[tokio::test]
async fn test_wrong_chain_is_rejected() {
    let ledger = MockLedger::new(4);
    let rpc = LedgerRpc::connect(
        ledger.roster.clone(),
        [0x01; 32],
        Arc::new(ledger.dialer.clone()),
        ConnectionConfig::default(),
        RpcConfig::default(),
    );
    let err = rpc.get_proof(&InstanceId::CONFIG).await.unwrap_err();
    assert!(matches!(err, RpcError::Authenticity(VerificationError::WrongChain { .. })));
}

#[tokio::test]
async fn test_config_instance_proof_is_a_lone_leaf() {
    let ledger = MockLedger::new(1);
    let rpc = ledger.rpc();
    let state = rpc.get_proof(&InstanceId::CONFIG).await.unwrap();
    assert!(state.is_present());

    let pk: PublicKey = user().public_key();
    let counters = rpc.get_signer_counters(&[pk]).await.unwrap();
    assert_eq!(counters[&pk], 0);
}

/// Spawn an instance and delete it again in one transaction. The target is
/// absent before and after, so only the counters can show the transaction.
fn spawn_then_delete(signer: &SigningKey, latest: u64) -> ClientTransaction {
    let pk = signer.public_key();
    let spawn = Instruction::spawn(AUTHORITY, "value", value(b"short-lived")).with_signer_counter(pk, latest + 1);
    let delete = Instruction::delete(spawn.derive_id(""), "value").with_signer_counter(pk, latest + 2);
    TransactionBuilder::new().add(spawn).add(delete).sign(&[signer as &dyn Signer]).unwrap()
}

#[tokio::test]
async fn test_dropped_transaction_is_never_reported_done() {
    let ledger = MockLedger::new(4);
    ledger.set_inclusion(Inclusion::Never);
    let rpc = ledger.rpc_with(
        ConnectionConfig::default(),
        RpcConfig {
            poll_interval_ms: 10,
            max_wait_ms: 150,
            ..Default::default()
        },
    );

    let tx = spawn_then_delete(&user(), 0);
    let err = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::InclusionTimeout { .. }), "{:?}", err);
    assert_eq!(ledger.applied(), 0);
    assert_eq!(ledger.height(), 0);
}

#[tokio::test]
async fn test_unchanged_target_is_observed_through_counters() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let alice = user();

    let tx = spawn_then_delete(&alice, 0);
    let outcome = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.height, 1);
    assert!(!outcome.state.is_present());
    assert_eq!(ledger.applied(), 1);
    assert_eq!(ledger.counter(&alice.public_key()), 2);
}

#[tokio::test]
async fn test_invoke_is_only_observed_above_the_baseline() {
    let ledger = MockLedger::new(4);
    let rpc = ledger.rpc();
    let alice = user();
    let id = spawn_value(&rpc, &alice, b"v0").await;

    ledger.set_inclusion(Inclusion::AfterProofRequests(2));
    let tx = build(&rpc, &alice, vec![Instruction::invoke(id, "value", "update", value(b"v1"))]).await;
    let outcome = rpc.submit_and_wait(&tx, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.polls, 2);
    assert_eq!(outcome.height, 2);
    assert_eq!(outcome.state.version(), Some(1));
}
