//! The ledger state the booker applies transactions against: the UTXO set,
//! per-output and per-transaction metadata, and the branch DAG.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tangle_store::{prefix, BlobStore, ObjectStorage};
use tangle_types::{BranchId, OutputId, TransactionId};

use crate::branch::BranchDag;
use crate::error::LedgerError;
use crate::output::{ColoredBalances, Output, OutputRecord};
use crate::output_metadata::OutputMetadata;
use crate::snapshot::Snapshot;
use crate::transaction::{balances_valid, Transaction};
use crate::transaction_metadata::TransactionMetadata;
use crate::unlock::{validate_unlocks, UnlockError};

/// Why a transaction is invalid. Terminal for the transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    Unlock(UnlockError),
    BalanceMismatch,
}

/// The result of attempting to book one transaction. Per-transaction
/// failures are values, not errors; only storage faults escape as `Err`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookOutcome {
    /// Applied. `forked` lists transactions that were retroactively moved
    /// into a fresh conflict branch because this transaction double-spends
    /// one of their inputs.
    Booked {
        branch: BranchId,
        forked: Vec<(TransactionId, BranchId)>,
    },
    /// Already booked earlier (idempotent replay).
    AlreadyBooked { branch: BranchId },
    /// One or more inputs are not (yet) known. Retry when they arrive.
    MissingInputs(Vec<OutputId>),
    /// An input is already spent by a confirmed transaction. Terminal.
    Rejected {
        conflicting_input: OutputId,
        confirmed_consumer: TransactionId,
    },
    /// Unlock or conservation failure. Terminal.
    Invalid(InvalidReason),
}

pub struct LedgerState {
    outputs: ObjectStorage<OutputRecord>,
    output_metadata: ObjectStorage<OutputMetadata>,
    transaction_metadata: ObjectStorage<TransactionMetadata>,
    branches: BranchDag,
}

impl LedgerState {
    pub fn new(blob: Arc<dyn BlobStore>, cache_time: Duration) -> Result<Self, LedgerError> {
        Ok(Self {
            outputs: ObjectStorage::new(Arc::clone(&blob), prefix::PREFIX_OUTPUT, cache_time),
            output_metadata: ObjectStorage::new(
                Arc::clone(&blob),
                prefix::PREFIX_OUTPUT_METADATA,
                cache_time,
            ),
            transaction_metadata: ObjectStorage::new(
                Arc::clone(&blob),
                prefix::PREFIX_TRANSACTION_METADATA,
                cache_time,
            ),
            branches: BranchDag::new(blob, cache_time)?,
        })
    }

    pub fn branch_dag(&self) -> &BranchDag {
        &self.branches
    }

    pub fn output(&self, id: &OutputId) -> Result<Option<OutputRecord>, LedgerError> {
        Ok(self.outputs.load(&id.to_bytes())?.map(|view| view.cloned()))
    }

    pub fn output_metadata(&self, id: &OutputId) -> Result<Option<OutputMetadata>, LedgerError> {
        Ok(self
            .output_metadata
            .load(&id.to_bytes())?
            .map(|view| view.cloned()))
    }

    pub fn transaction_metadata(
        &self,
        id: &TransactionId,
    ) -> Result<Option<TransactionMetadata>, LedgerError> {
        Ok(self
            .transaction_metadata
            .load(id.as_bytes())?
            .map(|view| view.cloned()))
    }

    /// Seed an output outside any transaction (genesis / snapshot), solid in
    /// the master branch.
    pub fn store_genesis_output(&self, record: OutputRecord) -> Result<(), LedgerError> {
        let id = record.id;
        self.outputs.store(record)?;
        let mut metadata = OutputMetadata::new(id, BranchId::MASTER);
        metadata.set_solid();
        self.output_metadata.store(metadata)?;
        Ok(())
    }

    /// Load an initial ledger state from a snapshot blob. Called once at
    /// startup, before any booking.
    pub fn load_snapshot(&self, snapshot: Snapshot) -> Result<(), LedgerError> {
        for branch in snapshot.branches {
            self.branches.store_branch(branch)?;
        }
        for record in snapshot.outputs {
            self.outputs.store(record)?;
        }
        for metadata in snapshot.output_metadata {
            self.output_metadata.store(metadata)?;
        }
        Ok(())
    }

    /// Attempt to book `transaction` whose carrying message sits in
    /// `parent_branch` (the aggregation of its parents' branches).
    ///
    /// The caller (the booker) is single-threaded over the scheduled message
    /// stream, so conflict detection and consumer registration below see a
    /// consistent view.
    pub fn apply_transaction(
        &self,
        transaction: &Transaction,
        parent_branch: BranchId,
    ) -> Result<BookOutcome, LedgerError> {
        let tx_id = transaction.id();

        if let Some(metadata) = self.transaction_metadata(&tx_id)? {
            if metadata.is_booked() {
                return Ok(BookOutcome::AlreadyBooked {
                    branch: metadata.branch_id,
                });
            }
        }

        // Resolve every input; defer on the full set of missing ones so the
        // booker can register one waiter per missing output.
        let mut consumed: Vec<(OutputId, Output)> = Vec::new();
        let mut missing: Vec<OutputId> = Vec::new();
        for input in &transaction.essence.inputs {
            match self.outputs.load(&input.to_bytes())? {
                Some(view) => consumed.push((*input, view.read(|record| record.output.clone()))),
                None => missing.push(*input),
            }
        }
        if !missing.is_empty() {
            return Ok(BookOutcome::MissingInputs(missing));
        }

        // A finalized spend is irreversible: any other consumer is rejected.
        for (input, _) in &consumed {
            let (metadata, _) = self.output_metadata.get_or_insert_with(
                &input.to_bytes(),
                || OutputMetadata::new(*input, BranchId::MASTER),
            )?;
            let (finalized, first_consumer) =
                metadata.read(|m| (m.is_finalized(), m.first_consumer()));
            if finalized {
                if let Some(consumer) = first_consumer {
                    if consumer != tx_id {
                        self.mark_rejected(tx_id, parent_branch)?;
                        return Ok(BookOutcome::Rejected {
                            conflicting_input: *input,
                            confirmed_consumer: consumer,
                        });
                    }
                }
            }
        }

        let essence_digest = transaction.essence.digest();
        let consumed_outputs: Vec<Output> =
            consumed.iter().map(|(_, output)| output.clone()).collect();
        if let Err(unlock_error) =
            validate_unlocks(&essence_digest, &transaction.unlocks, &consumed_outputs)
        {
            self.mark_rejected(tx_id, parent_branch)?;
            return Ok(BookOutcome::Invalid(InvalidReason::Unlock(unlock_error)));
        }

        let consumed_balances: Vec<ColoredBalances> = consumed_outputs
            .iter()
            .map(|output| output.balances())
            .collect();
        if !balances_valid(&consumed_balances, &transaction.essence.outputs) {
            self.mark_rejected(tx_id, parent_branch)?;
            return Ok(BookOutcome::Invalid(InvalidReason::BalanceMismatch));
        }

        // Branch inheritance: parents' aggregate plus the consumed outputs'
        // branches. Conflict detection must read consumer counts before this
        // transaction registers itself.
        let mut base_members = BTreeSet::from([parent_branch]);
        let mut contested: Vec<(OutputId, TransactionId)> = Vec::new();
        for (input, _) in &consumed {
            if let Some(metadata) = self.output_metadata(input)? {
                base_members.insert(metadata.branch_id);
                if metadata.consumer_count() > 0 {
                    if let Some(first) = metadata.first_consumer() {
                        contested.push((*input, first));
                    }
                }
            }
        }
        let base_branch = self.branches.aggregate(&base_members)?;

        let mut forked = Vec::new();
        let branch = if contested.is_empty() {
            base_branch
        } else {
            for (input, first_consumer) in &contested {
                // Retroactively fork the first consumer into its own conflict
                // branch the first time somebody contests this output.
                let first_branch = BranchId::new(*first_consumer.as_bytes());
                let already_forked = self.branches.branch(&first_branch)?.is_some();
                let first_parent = self
                    .transaction_metadata(first_consumer)?
                    .map(|m| m.branch_id)
                    .unwrap_or(BranchId::MASTER);
                let created = self.branches.create_conflict_branch(
                    *first_consumer,
                    first_parent,
                    *input,
                )?;
                if !already_forked {
                    tracing::info!(
                        output = %input,
                        first = %first_consumer,
                        second = %tx_id,
                        "double spend detected, forking consumers"
                    );
                    self.reassign_transaction_branch(first_consumer, created)?;
                    forked.push((*first_consumer, created));
                }

                self.branches
                    .create_conflict_branch(tx_id, base_branch, *input)?;
            }
            BranchId::new(*tx_id.as_bytes())
        };

        // Consumer bookkeeping and UTXO creation.
        for (input, _) in &consumed {
            if let Some(view) = self.output_metadata.load(&input.to_bytes())? {
                view.write(|metadata| {
                    metadata.register_consumer(tx_id);
                })?;
            }
        }

        let minted = transaction.minted_color();
        for (index, output) in transaction.essence.outputs.iter().enumerate() {
            let id = OutputId::new(tx_id, index as u16);
            self.outputs.store(OutputRecord {
                id,
                output: output.resolve_mint(minted),
            })?;
            let mut metadata = OutputMetadata::new(id, branch);
            metadata.set_solid();
            self.output_metadata.store(metadata)?;
        }

        let mut metadata = TransactionMetadata::new(tx_id, branch);
        metadata.set_booked();
        self.transaction_metadata.store(metadata)?;

        Ok(BookOutcome::Booked { branch, forked })
    }

    /// Finalize a booked transaction: its spends become irreversible and its
    /// branch is liked. Driven by the consensus collaborator.
    pub fn confirm_transaction(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let tx_id = transaction.id();
        for input in &transaction.essence.inputs {
            if let Some(view) = self.output_metadata.load(&input.to_bytes())? {
                view.write(|metadata| {
                    metadata.set_finalized();
                })?;
            }
        }
        if let Some(view) = self.transaction_metadata.load(tx_id.as_bytes())? {
            let branch = view.write(|metadata| {
                metadata.set_finalized();
                metadata.branch_id
            })?;
            if branch != BranchId::MASTER && self.branches.branch(&branch)?.is_some() {
                self.branches.set_liked(&branch, true)?;
            }
        }
        Ok(())
    }

    fn mark_rejected(&self, tx_id: TransactionId, branch: BranchId) -> Result<(), LedgerError> {
        let (view, _) = self
            .transaction_metadata
            .get_or_insert_with(tx_id.as_bytes(), || TransactionMetadata::new(tx_id, branch))?;
        view.write(|metadata| {
            metadata.set_rejected();
        })?;
        Ok(())
    }

    fn reassign_transaction_branch(
        &self,
        tx_id: &TransactionId,
        branch: BranchId,
    ) -> Result<(), LedgerError> {
        if let Some(view) = self.transaction_metadata.load(tx_id.as_bytes())? {
            view.write(|metadata| {
                metadata.branch_id = branch;
            })?;
        }
        // outputs created by the forked transaction follow it into the branch
        let mut index = 0u16;
        while let Some(view) = self
            .output_metadata
            .load(&OutputId::new(*tx_id, index).to_bytes())?
        {
            view.write(|metadata| {
                metadata.branch_id = branch;
            })?;
            index += 1;
        }
        Ok(())
    }

    /// Evict stale cache entries across all families.
    pub fn sweep(&self) {
        self.outputs.sweep();
        self.output_metadata.sweep();
        self.transaction_metadata.sweep();
        self.branches.sweep();
    }

    /// Drop all caches (shutdown). State is write-through, nothing is lost.
    pub fn flush(&self) {
        self.outputs.flush();
        self.output_metadata.flush();
        self.transaction_metadata.flush();
        self.branches.flush();
    }
}
