//! The booker applies scheduled messages to the ledger and assigns each
//! message its branch.
//!
//! Non-transaction payloads inherit the aggregation of their parents'
//! branches. Transactions go through the ledger: unknown inputs defer the
//! message (retried when the missing output is created, bounded), terminal
//! failures mark the message invalid, conflicts fork branches. The booker is
//! single-threaded over the scheduled stream; commit order is dispatch
//! order.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tangle_ledger::{BookOutcome, LedgerState};
use tangle_types::{BranchId, MessageId, OutputId, TransactionId};

use crate::events::BookerEvents;
use crate::message::Message;
use crate::metadata::MessageMetadata;
use crate::storage::Storage;
use tangle_store::{CachedObject, StoreError};

pub struct Booker {
    storage: Arc<Storage>,
    ledger: Arc<LedgerState>,
    /// Messages waiting for a missing output, keyed by that output.
    pending_by_output: Mutex<HashMap<OutputId, Vec<MessageId>>>,
    retries: Mutex<HashMap<MessageId, u32>>,
    max_retries: u32,
    pub events: BookerEvents,
}

impl Booker {
    pub fn new(storage: Arc<Storage>, ledger: Arc<LedgerState>, max_retries: u32) -> Self {
        Self {
            storage,
            ledger,
            pending_by_output: Mutex::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
            max_retries,
            events: BookerEvents::default(),
        }
    }

    /// Book one scheduled message. Idempotent: replaying a booked or invalid
    /// message is a no-op.
    pub fn book(&self, message_id: MessageId) -> Result<(), StoreError> {
        let Some(message_view) = self.storage.message(&message_id)? else {
            return Ok(());
        };
        let Some(metadata_view) = self.storage.message_metadata(&message_id)? else {
            return Ok(());
        };
        if metadata_view.read(|m| m.is_booked() || m.is_invalid() || m.is_lazy_booked()) {
            return Ok(());
        }

        let message = message_view.cloned();
        let parent_branch = self.parent_branch(&message)?;

        let Some(transaction) = message.payload.as_transaction().cloned() else {
            let transitioned = metadata_view.write(|m| {
                m.set_branch_id(parent_branch);
                m.set_booked()
            })?;
            if transitioned {
                tracing::debug!(message_id = %message_id, "message booked");
                self.events.message_booked.trigger(&message_id);
            }
            return Ok(());
        };

        let outcome = match self.ledger.apply_transaction(&transaction, parent_branch) {
            Ok(outcome) => outcome,
            Err(tangle_ledger::LedgerError::Store(e)) => return Err(e),
            Err(e) => {
                tracing::warn!(message_id = %message_id, error = %e, "booking failed");
                return Ok(());
            }
        };

        match outcome {
            BookOutcome::Booked { branch, forked } => {
                for (forked_tx, forked_branch) in forked {
                    self.reassign_attachments(&forked_tx, forked_branch)?;
                }
                let transitioned = metadata_view.write(|m| {
                    m.set_branch_id(branch);
                    m.set_booked()
                })?;
                if transitioned {
                    tracing::debug!(message_id = %message_id, branch = %branch, "message booked");
                    self.events.message_booked.trigger(&message_id);
                }
                self.lock_retries().remove(&message_id);
                self.retry_waiters(&transaction.id(), transaction.essence.outputs.len())?;
            }
            BookOutcome::AlreadyBooked { branch } => {
                let transitioned = metadata_view.write(|m| {
                    m.set_branch_id(branch);
                    m.set_booked()
                })?;
                if transitioned {
                    self.events.message_booked.trigger(&message_id);
                }
            }
            BookOutcome::MissingInputs(missing) => {
                self.defer(message_id, missing)?;
            }
            BookOutcome::Rejected {
                conflicting_input,
                confirmed_consumer,
            } => {
                tracing::info!(
                    message_id = %message_id,
                    input = %conflicting_input,
                    consumer = %confirmed_consumer,
                    "transaction double-spends a finalized output"
                );
                self.invalidate(&metadata_view, message_id)?;
            }
            BookOutcome::Invalid(reason) => {
                tracing::info!(message_id = %message_id, ?reason, "transaction invalid at booking");
                self.invalidate(&metadata_view, message_id)?;
            }
        }
        Ok(())
    }

    /// The aggregation of the branches of the message's parents.
    fn parent_branch(&self, message: &Message) -> Result<BranchId, StoreError> {
        let mut members = BTreeSet::new();
        for parent in message.parents() {
            if parent.is_empty() {
                members.insert(BranchId::MASTER);
                continue;
            }
            match self.storage.message_metadata(parent)? {
                Some(view) => {
                    members.insert(view.read(|m| m.branch_id()));
                }
                None => {
                    members.insert(BranchId::MASTER);
                }
            }
        }
        if members.is_empty() {
            members.insert(BranchId::MASTER);
        }
        match self.ledger.branch_dag().aggregate(&members) {
            Ok(branch) => Ok(branch),
            Err(tangle_ledger::LedgerError::Store(e)) => Err(e),
            Err(_) => Ok(BranchId::MASTER),
        }
    }

    /// Register this message as waiting for its missing inputs, bounded by
    /// the retry budget; past the budget the message is marked lazy-booked.
    fn defer(
        &self,
        message_id: MessageId,
        missing: Vec<OutputId>,
    ) -> Result<(), StoreError> {
        let attempts = {
            let mut retries = self.lock_retries();
            let attempts = retries.entry(message_id).or_insert(0);
            *attempts += 1;
            *attempts
        };

        if attempts > self.max_retries {
            tracing::info!(message_id = %message_id, "giving up on missing inputs, marking lazy-booked");
            self.lock_retries().remove(&message_id);
            if let Some(view) = self.storage.message_metadata(&message_id)? {
                view.write(|m| m.set_lazy_booked())?;
            }
            return Ok(());
        }

        tracing::debug!(message_id = %message_id, missing = missing.len(), "booking deferred on missing inputs");
        let mut pending = self.lock_pending();
        for output in missing {
            pending.entry(output).or_default().push(message_id);
        }
        Ok(())
    }

    /// A transaction was booked: wake every message that waited for one of
    /// its outputs.
    fn retry_waiters(
        &self,
        transaction_id: &TransactionId,
        output_count: usize,
    ) -> Result<(), StoreError> {
        let mut waiters = Vec::new();
        {
            let mut pending = self.lock_pending();
            for index in 0..output_count {
                let output = OutputId::new(*transaction_id, index as u16);
                if let Some(waiting) = pending.remove(&output) {
                    waiters.extend(waiting);
                }
            }
        }
        for waiter in waiters {
            self.book(waiter)?;
        }
        Ok(())
    }

    /// Move every attachment of a retroactively forked transaction into its
    /// new conflict branch.
    fn reassign_attachments(
        &self,
        transaction_id: &TransactionId,
        branch: BranchId,
    ) -> Result<(), StoreError> {
        for attachment in self.storage.attachments(transaction_id)? {
            if let Some(view) = self.storage.message_metadata(&attachment.message_id)? {
                view.write(|m| m.set_branch_id(branch))?;
            }
        }
        Ok(())
    }

    fn invalidate(
        &self,
        metadata_view: &CachedObject<MessageMetadata>,
        message_id: MessageId,
    ) -> Result<(), StoreError> {
        let transitioned = metadata_view.write(|m| m.set_invalid_after_solid())?;
        if transitioned {
            self.events.message_invalid.trigger(&message_id);
        }
        Ok(())
    }

    /// Messages currently parked on missing inputs.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().values().map(|v| v.len()).sum()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<OutputId, Vec<MessageId>>> {
        match self.pending_by_output.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_retries(&self) -> std::sync::MutexGuard<'_, HashMap<MessageId, u32>> {
        match self.retries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tangle_crypto::{keypair_from_seed, sign_message};
    use tangle_ledger::{
        Address, Output, OutputRecord, SignatureUnlock, Transaction,
        TransactionEssence, UnlockBlock,
    };
    use tangle_store::MemoryBlobStore;
    use tangle_types::{KeyPair, NodeId, Timestamp};

    fn setup() -> (Arc<Storage>, Arc<LedgerState>, Booker) {
        let blob = Arc::new(MemoryBlobStore::new());
        let storage = Arc::new(Storage::new(
            Arc::clone(&blob) as Arc<dyn tangle_store::BlobStore>,
            Duration::from_secs(60),
        ));
        let ledger = Arc::new(
            LedgerState::new(blob as Arc<dyn tangle_store::BlobStore>, Duration::from_secs(60))
                .unwrap(),
        );
        let booker = Booker::new(Arc::clone(&storage), Arc::clone(&ledger), 3);
        (storage, ledger, booker)
    }

    fn wallet() -> KeyPair {
        keypair_from_seed(&[1u8; 32])
    }

    fn wallet_output(keys: &KeyPair, amount: u64) -> Output {
        Output::SigLockedSingle {
            address: Address::from_ed25519_public_key(&keys.public),
            amount,
        }
    }

    fn seed_genesis(ledger: &LedgerState, keys: &KeyPair, byte: u8, amount: u64) -> OutputId {
        let id = OutputId::new(TransactionId::new([byte; 32]), 0);
        ledger
            .store_genesis_output(OutputRecord {
                id,
                output: wallet_output(keys, amount),
            })
            .unwrap();
        id
    }

    fn spend(keys: &KeyPair, inputs: Vec<OutputId>, outputs: Vec<Output>) -> Transaction {
        let essence = TransactionEssence::new(
            Timestamp::new(1000),
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

    fn store_message(storage: &Storage, payload: Payload, seq: u64) -> MessageId {
        let message = Message::new(
            vec![tangle_types::MessageId::EMPTY],
            vec![],
            Timestamp::new(1000),
            &wallet(),
            seq,
            payload,
            0,
        )
        .unwrap();
        let id = message.id();
        storage.store_message(message, Timestamp::new(1000)).unwrap();
        id
    }

    // ── Data payloads ───────────────────────────────────────────────────

    #[test]
    fn data_message_books_into_parent_branch() {
        let (storage, _ledger, booker) = setup();
        let booked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&booked);
        booker.events.message_booked.attach(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = store_message(&storage, Payload::Data(b"hello".to_vec()), 0);
        booker.book(id).unwrap();

        let metadata = storage.message_metadata(&id).unwrap().unwrap();
        assert!(metadata.read(|m| m.is_booked()));
        assert_eq!(metadata.read(|m| m.branch_id()), BranchId::MASTER);
        assert_eq!(booked.load(Ordering::SeqCst), 1);

        // replay is a no-op
        booker.book(id).unwrap();
        assert_eq!(booked.load(Ordering::SeqCst), 1);
    }

    // ── Transactions ────────────────────────────────────────────────────

    #[test]
    fn transaction_message_books_and_creates_outputs() {
        let (storage, ledger, booker) = setup();
        let keys = wallet();
        let genesis = seed_genesis(&ledger, &keys, 7, 100);

        let tx = spend(&keys, vec![genesis], vec![wallet_output(&keys, 100)]);
        let tx_id = tx.id();
        let id = store_message(&storage, Payload::Transaction(Box::new(tx)), 0);
        booker.book(id).unwrap();

        let metadata = storage.message_metadata(&id).unwrap().unwrap();
        assert!(metadata.read(|m| m.is_booked()));
        assert!(ledger.output(&OutputId::new(tx_id, 0)).unwrap().is_some());

        // the attachment back-reference exists
        let attachments = storage.attachments(&tx_id).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].message_id, id);
    }

    #[test]
    fn missing_input_defers_and_retries_on_arrival() {
        let (storage, ledger, booker) = setup();
        let keys = wallet();
        let genesis = seed_genesis(&ledger, &keys, 7, 100);

        let first = spend(&keys, vec![genesis], vec![wallet_output(&keys, 100)]);
        let second = spend(
            &keys,
            vec![OutputId::new(first.id(), 0)],
            vec![wallet_output(&keys, 100)],
        );

        // the dependent transaction is scheduled before its input exists
        let second_msg = store_message(&storage, Payload::Transaction(Box::new(second)), 0);
        booker.book(second_msg).unwrap();
        assert_eq!(booker.pending_count(), 1);
        let metadata = storage.message_metadata(&second_msg).unwrap().unwrap();
        assert!(!metadata.read(|m| m.is_booked()));

        // once the provider books, the waiter is retried automatically
        let first_msg = store_message(&storage, Payload::Transaction(Box::new(first)), 1);
        booker.book(first_msg).unwrap();

        assert_eq!(booker.pending_count(), 0);
        let metadata = storage.message_metadata(&second_msg).unwrap().unwrap();
        assert!(metadata.read(|m| m.is_booked()));
    }

    #[test]
    fn exhausted_retries_mark_lazy_booked() {
        let (storage, _ledger, booker) = setup();
        let keys = wallet();
        let unknown = OutputId::new(TransactionId::new([9u8; 32]), 0);
        let tx = spend(&keys, vec![unknown], vec![wallet_output(&keys, 1)]);
        let id = store_message(&storage, Payload::Transaction(Box::new(tx)), 0);

        // each replay simulates one retry attempt; the budget is 3
        for _ in 0..4 {
            booker.book(id).unwrap();
        }

        let metadata = storage.message_metadata(&id).unwrap().unwrap();
        assert!(metadata.read(|m| m.is_lazy_booked()));
        assert!(!metadata.read(|m| m.is_booked()));
        // further replays are no-ops
        booker.book(id).unwrap();
    }

    #[test]
    fn balance_mismatch_marks_the_message_invalid() {
        let (storage, ledger, booker) = setup();
        let keys = wallet();
        let genesis = seed_genesis(&ledger, &keys, 7, 100);
        let invalid_events = Arc::new(AtomicUsize::new(0));
        let booked_events = Arc::new(AtomicUsize::new(0));
        let i = Arc::clone(&invalid_events);
        booker.events.message_invalid.attach(move |_| {
            i.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&booked_events);
        booker.events.message_booked.attach(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        let tx = spend(&keys, vec![genesis], vec![wallet_output(&keys, 99)]);
        let id = store_message(&storage, Payload::Transaction(Box::new(tx)), 0);
        booker.book(id).unwrap();

        let metadata = storage.message_metadata(&id).unwrap().unwrap();
        assert!(metadata.read(|m| m.is_invalid()));
        assert_eq!(invalid_events.load(Ordering::SeqCst), 1);
        assert_eq!(booked_events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn double_spend_moves_both_messages_into_sibling_branches() {
        let (storage, ledger, booker) = setup();
        let keys = wallet();
        let genesis = seed_genesis(&ledger, &keys, 7, 100);

        let t1 = spend(&keys, vec![genesis], vec![wallet_output(&keys, 100)]);
        let t2 = spend(
            &keys,
            vec![genesis],
            vec![wallet_output(&keys, 60), wallet_output(&keys, 40)],
        );
        let b1 = BranchId::new(*t1.id().as_bytes());
        let b2 = BranchId::new(*t2.id().as_bytes());

        let m1 = store_message(&storage, Payload::Transaction(Box::new(t1)), 0);
        let m2 = store_message(&storage, Payload::Transaction(Box::new(t2)), 1);
        booker.book(m1).unwrap();
        booker.book(m2).unwrap();

        let meta1 = storage.message_metadata(&m1).unwrap().unwrap();
        let meta2 = storage.message_metadata(&m2).unwrap().unwrap();
        assert_eq!(meta1.read(|m| m.branch_id()), b1);
        assert_eq!(meta2.read(|m| m.branch_id()), b2);
        assert!(ledger.branch_dag().conflicting_branches(&b1).contains(&b2));
    }

    #[test]
    fn confirmed_double_spend_is_invalid() {
        let (storage, ledger, booker) = setup();
        let keys = wallet();
        let genesis = seed_genesis(&ledger, &keys, 7, 100);

        let t1 = spend(&keys, vec![genesis], vec![wallet_output(&keys, 100)]);
        let m1 = store_message(&storage, Payload::Transaction(Box::new(t1.clone())), 0);
        booker.book(m1).unwrap();
        ledger.confirm_transaction(&t1).unwrap();

        let t2 = spend(
            &keys,
            vec![genesis],
            vec![wallet_output(&keys, 60), wallet_output(&keys, 40)],
        );
        let m2 = store_message(&storage, Payload::Transaction(Box::new(t2)), 1);
        booker.book(m2).unwrap();

        let metadata = storage.message_metadata(&m2).unwrap().unwrap();
        assert!(metadata.read(|m| m.is_invalid()));
    }
}
