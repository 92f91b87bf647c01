//! The solidifier — marks messages solid once their entire past cone is
//! known, and enforces the parent timestamp window.

use std::collections::VecDeque;
use std::sync::Arc;

use tangle_types::{MessageId, Timestamp};

use crate::events::SolidifierEvents;
use crate::message::Message;
use crate::storage::Storage;

/// Smallest allowed difference between a message's issuing time and a
/// parent's (parents may not be younger than their children).
const MIN_PARENT_TIME_DIFFERENCE_SECS: u64 = 0;

/// Biggest allowed difference between a message's issuing time and a
/// parent's: 30 minutes.
const MAX_PARENT_TIME_DIFFERENCE_SECS: u64 = 30 * 60;

pub struct Solidifier {
    storage: Arc<Storage>,
    pub events: SolidifierEvents,
}

impl Solidifier {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            events: SolidifierEvents::default(),
        }
    }

    /// Solidify the given message: a breadth-first walk over the approvers
    /// relation starting at `message_id`. Re-entrant and idempotent — the
    /// metadata transitions are compare-and-set, so replays are no-ops.
    pub fn solidify(&self, message_id: MessageId) {
        let mut to_check = VecDeque::from([message_id]);
        while let Some(current) = to_check.pop_front() {
            for next in self.check_message_solidity(current) {
                to_check.push_back(next);
            }
        }
    }

    /// Check one message; returns the approvers to check next when the
    /// message just became solid.
    fn check_message_solidity(&self, message_id: MessageId) -> Vec<MessageId> {
        let Ok(Some(message_view)) = self.storage.message(&message_id) else {
            return Vec::new();
        };
        let Ok(Some(metadata_view)) = self.storage.message_metadata(&message_id) else {
            return Vec::new();
        };
        let message = message_view.cloned();

        if metadata_view.read(|m| m.is_invalid()) {
            return Vec::new();
        }

        if !self.all_parents_solid(&message) {
            return Vec::new();
        }

        if !self.parents_valid(&message) {
            let transitioned = metadata_view
                .write(|m| m.set_invalid())
                .unwrap_or(false);
            if transitioned {
                tracing::info!(message_id = %message_id, "message invalid: parent time window violated");
                self.events.message_invalid.trigger(&message_id);
            }
            return Vec::new();
        }

        let now = Timestamp::now();
        let transitioned = metadata_view
            .write(|m| m.set_solid(now))
            .unwrap_or(false);
        if !transitioned {
            return Vec::new();
        }
        tracing::debug!(message_id = %message_id, "message solid");
        self.events.message_solid.trigger(&message_id);

        match self.storage.approvers(&message_id) {
            Ok(approvers) => approvers.into_iter().map(|a| a.child).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Whether every parent is known and solid.
    ///
    /// Every parent is queried even after one turns out not solid: the query
    /// itself creates missing-message stubs and triggers requests, so this
    /// loop must not short-circuit.
    fn all_parents_solid(&self, message: &Message) -> bool {
        let mut solid = true;
        for parent in message.parents() {
            // evaluate the parent check first so every parent gets queried
            let parent_solid = self.is_parent_marked_solid(parent);
            solid = parent_solid && solid;
        }
        solid
    }

    /// Whether a single parent is marked solid, creating a metadata stub (and
    /// a missing-message request) when the parent is unknown.
    fn is_parent_marked_solid(&self, parent: &MessageId) -> bool {
        if parent.is_empty() {
            return true;
        }
        match self
            .storage
            .store_if_missing_metadata(parent, Timestamp::now())
        {
            Ok(view) => view.read(|m| m.is_solid()),
            Err(_) => false,
        }
    }

    /// Whether every parent with a known issuing time falls inside the
    /// allowed window relative to the child's issuing time.
    fn parents_valid(&self, message: &Message) -> bool {
        let mut valid = true;
        for parent in message.parents() {
            valid = valid && self.is_parent_valid(parent, message.issuing_time);
        }
        valid
    }

    fn is_parent_valid(&self, parent: &MessageId, child_issuing_time: Timestamp) -> bool {
        if parent.is_empty() {
            return true;
        }
        let Ok(Some(parent_view)) = self.storage.message(parent) else {
            // unknown issuing time cannot be checked; solidity gating already
            // guarantees the parent arrives before the child solidifies
            return true;
        };
        let parent_time = parent_view.read(|m| m.issuing_time);

        if child_issuing_time < parent_time {
            return false;
        }
        let difference = parent_time.elapsed_since(child_issuing_time);
        (MIN_PARENT_TIME_DIFFERENCE_SECS..=MAX_PARENT_TIME_DIFFERENCE_SECS).contains(&difference)
    }
}
