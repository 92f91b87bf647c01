//! Cached, write-through storage for the message DAG families: messages,
//! metadata, approvers, attachments.
//!
//! Deduplication happens here: storing the same message bytes twice yields
//! exactly one `MessageStored` event. Unknown parents get a metadata stub
//! via [`Storage::store_if_missing_metadata`], which fires `MissingMessage`
//! exactly once per missing id so the gossip layer can request it.

use std::sync::Arc;
use std::time::Duration;

use tangle_store::{prefix, BlobStore, CachedObject, ObjectStorage, StoreError};
use tangle_types::{MessageId, Timestamp, TransactionId};

use crate::approver::{Approver, ApproverKind};
use crate::attachment::Attachment;
use crate::events::StorageEvents;
use crate::message::Message;
use crate::metadata::MessageMetadata;

pub struct Storage {
    blob: Arc<dyn BlobStore>,
    messages: ObjectStorage<Message>,
    message_metadata: ObjectStorage<MessageMetadata>,
    approvers: ObjectStorage<Approver>,
    attachments: ObjectStorage<Attachment>,
    pub events: StorageEvents,
}

impl Storage {
    pub fn new(blob: Arc<dyn BlobStore>, cache_time: Duration) -> Self {
        Self {
            messages: ObjectStorage::new(Arc::clone(&blob), prefix::PREFIX_MESSAGE, cache_time),
            message_metadata: ObjectStorage::new(
                Arc::clone(&blob),
                prefix::PREFIX_MESSAGE_METADATA,
                cache_time,
            ),
            approvers: ObjectStorage::new(Arc::clone(&blob), prefix::PREFIX_APPROVER, cache_time),
            attachments: ObjectStorage::new(
                Arc::clone(&blob),
                prefix::PREFIX_ATTACHMENT,
                cache_time,
            ),
            blob,
            events: StorageEvents::default(),
        }
    }

    /// Persist a message, deduplicating by id. On first store the approver
    /// and attachment back-references are created, metadata is ensured (an
    /// earlier missing-parent stub is reused), and `MessageStored` fires.
    ///
    /// Returns the message view and whether this call created the entry.
    pub fn store_message(
        &self,
        message: Message,
        received_at: Timestamp,
    ) -> Result<(CachedObject<Message>, bool), StoreError> {
        let id = message.id();
        let strong_parents = message.strong_parents.clone();
        let weak_parents = message.weak_parents.clone();
        let transaction_id = message.payload.as_transaction().map(|tx| tx.id());

        let (view, created) = self.messages.store_if_absent(message)?;
        if !created {
            return Ok((view, false));
        }

        for parent in strong_parents {
            if parent.is_empty() {
                continue;
            }
            self.approvers.store_if_absent(Approver {
                parent,
                child: id,
                kind: ApproverKind::Strong,
            })?;
        }
        for parent in weak_parents {
            if parent.is_empty() {
                continue;
            }
            self.approvers.store_if_absent(Approver {
                parent,
                child: id,
                kind: ApproverKind::Weak,
            })?;
        }

        if let Some(transaction_id) = transaction_id {
            self.attachments.store_if_absent(Attachment {
                transaction_id,
                message_id: id,
            })?;
        }

        self.message_metadata
            .get_or_insert_with(id.as_bytes(), || MessageMetadata::new(id, received_at))?;

        self.events.message_stored.trigger(&id);
        Ok((view, true))
    }

    pub fn message(&self, id: &MessageId) -> Result<Option<CachedObject<Message>>, StoreError> {
        self.messages.load(id.as_bytes())
    }

    pub fn contains_message(&self, id: &MessageId) -> Result<bool, StoreError> {
        self.messages.contains(id.as_bytes())
    }

    pub fn message_metadata(
        &self,
        id: &MessageId,
    ) -> Result<Option<CachedObject<MessageMetadata>>, StoreError> {
        self.message_metadata.load(id.as_bytes())
    }

    /// Return the metadata of `id`, inserting a `solid=false` stub when the
    /// message is unknown. Stub creation fires `MissingMessage` so transport
    /// can request the message from peers.
    pub fn store_if_missing_metadata(
        &self,
        id: &MessageId,
        now: Timestamp,
    ) -> Result<CachedObject<MessageMetadata>, StoreError> {
        let (view, created) = self
            .message_metadata
            .get_or_insert_with(id.as_bytes(), || MessageMetadata::new(*id, now))?;
        if created && !self.contains_message(id)? {
            self.events.missing_message.trigger(id);
        }
        Ok(view)
    }

    /// All approvers (children) of `parent`, strong and weak.
    pub fn approvers(&self, parent: &MessageId) -> Result<Vec<Approver>, StoreError> {
        let mut key_prefix = Vec::with_capacity(33);
        key_prefix.push(prefix::PREFIX_APPROVER);
        key_prefix.extend_from_slice(parent.as_bytes());

        let mut approvers = Vec::new();
        for (_, bytes) in self.blob.iterate(&key_prefix)? {
            approvers.push(bincode::deserialize(&bytes)?);
        }
        Ok(approvers)
    }

    /// Every message carrying `transaction_id` as its payload.
    pub fn attachments(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<Attachment>, StoreError> {
        let mut key_prefix = Vec::with_capacity(33);
        key_prefix.push(prefix::PREFIX_ATTACHMENT);
        key_prefix.extend_from_slice(transaction_id.as_bytes());

        let mut attachments = Vec::new();
        for (_, bytes) in self.blob.iterate(&key_prefix)? {
            attachments.push(bincode::deserialize(&bytes)?);
        }
        Ok(attachments)
    }

    /// Remove a message and its metadata from the persistent store (pruning).
    pub fn prune_message(&self, id: &MessageId) -> Result<(), StoreError> {
        self.messages.delete(id.as_bytes())?;
        self.message_metadata.delete(id.as_bytes())?;
        self.events.message_removed.trigger(id);
        Ok(())
    }

    /// Evict stale cache entries across all families.
    pub fn sweep(&self) {
        self.messages.sweep();
        self.message_metadata.sweep();
        self.approvers.sweep();
        self.attachments.sweep();
    }

    /// Drop all caches (shutdown). Writes are write-through, nothing is lost.
    pub fn flush(&self) {
        self.messages.flush();
        self.message_metadata.flush();
        self.approvers.flush();
        self.attachments.flush();
    }
}
