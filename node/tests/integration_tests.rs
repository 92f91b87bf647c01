//! End-to-end pipeline tests: gossip bytes through parsing, storage,
//! solidification, scheduling, and booking.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tangle_crypto::{keypair_from_seed, node_id, sign_message};
use tangle_ledger::{
    Address, Output, OutputRecord, SignatureUnlock, Transaction, TransactionEssence, UnlockBlock,
};
use tangle_node::consensus::FixedOpinion;
use tangle_node::{Message, Payload, StaticMana, Tangle, TangleConfig};
use tangle_store::MemoryBlobStore;
use tangle_types::{BranchId, KeyPair, MessageId, NodeId, OutputId, Timestamp, TransactionId};

fn issuer() -> KeyPair {
    keypair_from_seed(&[1u8; 32])
}

/// A tangle whose event flow is not wired yet; tests that care about
/// subscriber order attach their probes first and call `setup` themselves.
fn build_tangle_unwired(config: TangleConfig) -> Arc<Tangle> {
    let mana = StaticMana::with(&[(node_id(&issuer().public), 1.0)]);
    Tangle::new(
        config,
        Arc::new(MemoryBlobStore::new()),
        keypair_from_seed(&[99u8; 32]),
        Arc::new(mana),
        Arc::new(FixedOpinion::liked()),
    )
    .unwrap()
}

fn build_tangle(config: TangleConfig) -> Arc<Tangle> {
    let tangle = build_tangle_unwired(config);
    tangle.setup();
    tangle
}

fn message_at(strong: Vec<MessageId>, time: Timestamp, seq: u64) -> Message {
    Message::new(
        strong,
        vec![MessageId::EMPTY],
        time,
        &issuer(),
        seq,
        Payload::Data(vec![]),
        0,
    )
    .unwrap()
}

fn tx_message(transaction: Transaction, seq: u64) -> Message {
    Message::new(
        vec![MessageId::EMPTY],
        vec![],
        Timestamp::now(),
        &issuer(),
        seq,
        Payload::Transaction(Box::new(transaction)),
        0,
    )
    .unwrap()
}

fn wallet_output(keys: &KeyPair, amount: u64) -> Output {
    Output::SigLockedSingle {
        address: Address::from_ed25519_public_key(&keys.public),
        amount,
    }
}

fn spend(keys: &KeyPair, inputs: Vec<OutputId>, outputs: Vec<Output>) -> Transaction {
    let essence = TransactionEssence::new(
        Timestamp::now(),
        NodeId::ZERO,
        NodeId::ZERO,
        inputs,
        outputs,
    );
    let digest = essence.digest();
    let unlocks = essence
        .inputs
        .iter()
        .map(|_| {
            UnlockBlock::Signature(SignatureUnlock::Ed25519 {
                public_key: keys.public.clone(),
                signature: sign_message(&digest, &keys.private),
            })
        })
        .collect();
    Transaction::new(essence, unlocks).unwrap()
}

fn seed_genesis(tangle: &Tangle, keys: &KeyPair, byte: u8, amount: u64) -> OutputId {
    let id = OutputId::new(TransactionId::new([byte; 32]), 0);
    tangle
        .ledger
        .store_genesis_output(OutputRecord {
            id,
            output: wallet_output(keys, amount),
        })
        .unwrap();
    id
}

fn peer() -> NodeId {
    NodeId::new([42u8; 32])
}

fn solid_log(tangle: &Tangle) -> Arc<Mutex<Vec<MessageId>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    tangle.solidifier.events.message_solid.attach(move |id| {
        sink.lock().unwrap().push(*id);
    });
    log
}

// ── Scenario 1: chain solidification in reverse arrival order ──────────

#[test]
fn reverse_injected_chain_solidifies_in_dag_order() {
    let tangle = build_tangle(TangleConfig::default());
    let solid = solid_log(&tangle);

    let now = Timestamp::now();
    let m1 = message_at(vec![MessageId::EMPTY], now, 0);
    let m2 = message_at(vec![m1.id()], now, 1);
    let m3 = message_at(vec![m2.id()], now, 2);

    for message in [&m3, &m2, &m1] {
        tangle
            .process_gossip_message(&message.bytes(), peer())
            .unwrap();
    }

    assert_eq!(*solid.lock().unwrap(), vec![m1.id(), m2.id(), m3.id()]);
}

// ── Scenario 2: missing parents are requested, arrival re-drives ───────

#[test]
fn missing_parent_is_requested_and_solidity_resumes_on_arrival() {
    let tangle = build_tangle(TangleConfig::default());
    let missing = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&missing);
    tangle.storage.events.missing_message.attach(move |id| {
        sink.lock().unwrap().push(*id);
    });
    let solid = solid_log(&tangle);

    let now = Timestamp::now();
    let m1 = message_at(vec![MessageId::EMPTY], now, 0);
    let m2 = message_at(vec![m1.id()], now, 1);
    let m3 = message_at(vec![m2.id()], now, 2);

    tangle.process_gossip_message(&m1.bytes(), peer()).unwrap();
    // m3 arrives while m2 is unknown
    tangle.process_gossip_message(&m3.bytes(), peer()).unwrap();

    assert_eq!(*missing.lock().unwrap(), vec![m2.id()]);
    let metadata = tangle.storage.message_metadata(&m3.id()).unwrap().unwrap();
    assert!(!metadata.read(|m| m.is_solid()));

    // m2 arrives; both m2 and m3 go solid
    tangle.process_gossip_message(&m2.bytes(), peer()).unwrap();
    assert_eq!(*solid.lock().unwrap(), vec![m1.id(), m2.id(), m3.id()]);
}

// ── Scenario 3: parent time window violation ────────────────────────────

#[test]
fn thirty_one_minute_parent_gap_is_invalid() {
    let tangle = build_tangle(TangleConfig::default());
    let invalid = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&invalid);
    tangle.solidifier.events.message_invalid.attach(move |id| {
        sink.lock().unwrap().push(*id);
    });
    let solid = solid_log(&tangle);

    let base = Timestamp::new(1_700_000_000);
    let m1 = message_at(vec![MessageId::EMPTY], base, 0);
    let m2 = message_at(vec![m1.id()], base.saturating_add(31 * 60), 1);

    tangle.process_gossip_message(&m1.bytes(), peer()).unwrap();
    tangle.process_gossip_message(&m2.bytes(), peer()).unwrap();

    assert_eq!(*invalid.lock().unwrap(), vec![m2.id()]);
    assert_eq!(*solid.lock().unwrap(), vec![m1.id()]);
    let metadata = tangle.storage.message_metadata(&m2.id()).unwrap().unwrap();
    assert!(metadata.read(|m| m.is_invalid()));
    assert!(!metadata.read(|m| m.is_solid()));
}

// ── Scenario 4: double spend creates sibling conflict branches ──────────

#[test]
fn double_spend_books_into_sibling_conflict_branches() {
    let tangle = build_tangle(TangleConfig::default());
    let keys = issuer();
    let genesis = seed_genesis(&tangle, &keys, 5, 100);

    let t1 = spend(&keys, vec![genesis], vec![wallet_output(&keys, 100)]);
    let t2 = spend(
        &keys,
        vec![genesis],
        vec![wallet_output(&keys, 60), wallet_output(&keys, 40)],
    );
    let (b1, b2) = (
        BranchId::new(*t1.id().as_bytes()),
        BranchId::new(*t2.id().as_bytes()),
    );

    let m1 = tx_message(t1, 0);
    let m2 = tx_message(t2, 1);
    tangle.process_gossip_message(&m1.bytes(), peer()).unwrap();
    tangle.process_gossip_message(&m2.bytes(), peer()).unwrap();
    while tangle.fifo_scheduler.dispatch_next().is_some() {}

    let meta1 = tangle.storage.message_metadata(&m1.id()).unwrap().unwrap();
    let meta2 = tangle.storage.message_metadata(&m2.id()).unwrap().unwrap();
    assert!(meta1.read(|m| m.is_booked()));
    assert!(meta2.read(|m| m.is_booked()));
    assert_eq!(meta1.read(|m| m.branch_id()), b1);
    assert_eq!(meta2.read(|m| m.branch_id()), b2);

    let conflicts = tangle.ledger.branch_dag().conflicting_branches(&b1);
    assert!(conflicts.contains(&b2));
}

// ── Scenario 5: balance mismatch is terminal at booking ─────────────────

#[test]
fn balance_mismatch_fires_invalid_and_never_books() {
    let tangle = build_tangle(TangleConfig::default());
    let keys = issuer();
    let genesis = seed_genesis(&tangle, &keys, 5, 100);

    let booked = Arc::new(AtomicUsize::new(0));
    let invalid = Arc::new(AtomicUsize::new(0));
    let b = Arc::clone(&booked);
    tangle.booker.events.message_booked.attach(move |_| {
        b.fetch_add(1, Ordering::SeqCst);
    });
    let i = Arc::clone(&invalid);
    tangle.booker.events.message_invalid.attach(move |_| {
        i.fetch_add(1, Ordering::SeqCst);
    });

    let tx = spend(&keys, vec![genesis], vec![wallet_output(&keys, 99)]);
    let message = tx_message(tx, 0);
    tangle
        .process_gossip_message(&message.bytes(), peer())
        .unwrap();
    while tangle.fifo_scheduler.dispatch_next().is_some() {}

    assert_eq!(booked.load(Ordering::SeqCst), 0);
    assert_eq!(invalid.load(Ordering::SeqCst), 1);
    let metadata = tangle
        .storage
        .message_metadata(&message.id())
        .unwrap()
        .unwrap();
    assert!(metadata.read(|m| m.is_invalid()));
}

// ── Scenario 6: sync transition handoff loses nothing ───────────────────

#[test]
fn handoff_drains_a_thousand_messages_exactly_once() {
    let config = TangleConfig {
        // the flood comes from one issuer; the submission-rate policy is not
        // under test here
        fifo_max_messages_per_second: 10_000,
        ..TangleConfig::default()
    };
    let tangle = build_tangle(config);

    let booked: Arc<Mutex<Vec<MessageId>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&booked);
    tangle.booker.events.message_booked.attach(move |id| {
        sink.lock().unwrap().push(*id);
    });

    let now = Timestamp::now();
    let stale = Timestamp::new(now.as_secs() - 600);

    let mut previous = MessageId::EMPTY;
    let mut all_ids = Vec::new();
    for seq in 0..1000u64 {
        let message = message_at(vec![previous], stale, seq);
        previous = message.id();
        all_ids.push(previous);
        tangle
            .process_gossip_message(&message.bytes(), peer())
            .unwrap();
    }

    tangle.run_sync_check();
    assert!(!tangle.scheduler.is_started(), "node must not be synced yet");
    assert_eq!(tangle.fifo_scheduler.queue_len(), 1000);

    // a recent message flips the node to synced
    let fresh = message_at(vec![previous], now, 1000);
    all_ids.push(fresh.id());
    tangle
        .process_gossip_message(&fresh.bytes(), peer())
        .unwrap();
    tangle.run_sync_check();

    assert!(tangle.fifo_scheduler.is_detached());
    assert!(tangle.scheduler.is_started());

    // drain anything the steady-state scheduler may still hold
    let mut guard = 0;
    while tangle.scheduler.buffered_len() > 0 && guard < 10_000 {
        tangle.scheduler.schedule_next();
        guard += 1;
    }

    let booked = booked.lock().unwrap();
    assert_eq!(booked.len(), 1001, "no message lost");
    let unique: HashSet<_> = booked.iter().collect();
    assert_eq!(unique.len(), 1001, "no message booked twice");
    for id in &all_ids {
        assert!(unique.contains(id));
    }
}

// ── Event ordering invariant ────────────────────────────────────────────

#[test]
fn per_message_events_follow_the_pipeline_order() {
    // probes are attached before the pipeline wiring so each probe observes
    // its stage before the next stage runs
    let tangle = build_tangle_unwired(TangleConfig::default());
    let log: Arc<Mutex<Vec<(&'static str, MessageId)>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&log);
    tangle.storage.events.message_stored.attach(move |id| {
        sink.lock().unwrap().push(("stored", *id));
    });
    let sink = Arc::clone(&log);
    tangle.solidifier.events.message_solid.attach(move |id| {
        sink.lock().unwrap().push(("solid", *id));
    });
    let sink = Arc::clone(&log);
    tangle
        .fifo_scheduler
        .events
        .message_scheduled
        .attach(move |id| {
            sink.lock().unwrap().push(("scheduled", *id));
        });
    let sink = Arc::clone(&log);
    tangle.booker.events.message_booked.attach(move |id| {
        sink.lock().unwrap().push(("booked", *id));
    });

    tangle.setup();

    let now = Timestamp::now();
    let m1 = message_at(vec![MessageId::EMPTY], now, 0);
    let m2 = message_at(vec![m1.id()], now, 1);
    tangle.process_gossip_message(&m1.bytes(), peer()).unwrap();
    tangle.process_gossip_message(&m2.bytes(), peer()).unwrap();
    while tangle.fifo_scheduler.dispatch_next().is_some() {}

    let log = log.lock().unwrap();
    for id in [m1.id(), m2.id()] {
        let stages: Vec<&str> = log
            .iter()
            .filter(|(_, logged)| *logged == id)
            .map(|(stage, _)| *stage)
            .collect();
        assert_eq!(stages, vec!["stored", "solid", "scheduled", "booked"]);
    }
}

// ── Idempotent ingest ───────────────────────────────────────────────────

#[test]
fn duplicate_gossip_bytes_store_once() {
    let tangle = build_tangle(TangleConfig::default());
    let stored = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&stored);
    tangle.storage.events.message_stored.attach(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let message = message_at(vec![MessageId::EMPTY], Timestamp::now(), 0);
    tangle
        .process_gossip_message(&message.bytes(), peer())
        .unwrap();
    tangle
        .process_gossip_message(&message.bytes(), peer())
        .unwrap();

    assert_eq!(stored.load(Ordering::SeqCst), 1);
    assert_eq!(tangle.fifo_scheduler.queue_len(), 1);
}

// ── Persistence: the pipeline works over the LMDB backend too ───────────

#[test]
fn pipeline_runs_over_lmdb() {
    tangle_node::logging::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let blob = Arc::new(tangle_store::LmdbBlobStore::open(dir.path()).unwrap());
    let mana = StaticMana::with(&[(node_id(&issuer().public), 1.0)]);
    let tangle = Tangle::new(
        TangleConfig::default(),
        blob,
        keypair_from_seed(&[99u8; 32]),
        Arc::new(mana),
        Arc::new(FixedOpinion::liked()),
    )
    .unwrap();
    tangle.setup();

    let keys = issuer();
    let genesis = seed_genesis(&tangle, &keys, 5, 100);
    let tx = spend(&keys, vec![genesis], vec![wallet_output(&keys, 100)]);
    let tx_id = tx.id();
    let message = tx_message(tx, 0);

    tangle
        .process_gossip_message(&message.bytes(), peer())
        .unwrap();
    while tangle.fifo_scheduler.dispatch_next().is_some() {}

    let metadata = tangle
        .storage
        .message_metadata(&message.id())
        .unwrap()
        .unwrap();
    assert!(metadata.read(|m| m.is_booked()));
    assert!(tangle
        .ledger
        .output(&OutputId::new(tx_id, 0))
        .unwrap()
        .is_some());
}
