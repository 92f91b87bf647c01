//! Uniform random tip selection for local issuance.
//!
//! A message becomes a tip when it goes solid and stops being one as soon as
//! a child referencing it arrives. The genesis is the tip of last resort.

use rand::seq::IteratorRandom;
use std::collections::HashSet;
use std::sync::Mutex;

use tangle_types::MessageId;

use crate::message::Message;

pub struct TipSelector {
    tips: Mutex<HashSet<MessageId>>,
}

impl TipSelector {
    pub fn new() -> Self {
        Self {
            tips: Mutex::new(HashSet::new()),
        }
    }

    /// Register a newly solid message: it becomes a tip, its parents stop
    /// being tips.
    pub fn update(&self, message: &Message) {
        let mut tips = self.lock();
        for parent in message.parents() {
            tips.remove(parent);
        }
        tips.insert(message.id());
    }

    /// Select up to `count` distinct tips, uniformly at random. Falls back to
    /// the genesis when no tips exist yet.
    pub fn select(&self, count: usize) -> Vec<MessageId> {
        let tips = self.lock();
        if tips.is_empty() {
            return vec![MessageId::EMPTY];
        }
        tips.iter()
            .copied()
            .choose_multiple(&mut rand::thread_rng(), count.max(1))
    }

    pub fn tip_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<MessageId>> {
        match self.tips.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for TipSelector {
    fn default() -> Self {
        Self::new()
    }
}
