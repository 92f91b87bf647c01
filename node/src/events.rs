//! Typed events with attach/detach subscriptions.
//!
//! Subscribers of one event are invoked in attach order on the triggering
//! thread; handlers must stay fast and must not re-enter the storage layer
//! with a view they already hold.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tangle_types::{MessageId, NodeId};

pub type SubscriptionId = usize;

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A single named event carrying payloads of type `T`.
pub struct Event<T> {
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber<T>)>>,
    next_id: AtomicUsize,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Attach a closure; returns the id to [`detach`] it with.
    pub fn attach(&self, f: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(f)));
        id
    }

    pub fn detach(&self, id: SubscriptionId) {
        self.lock().retain(|(sub_id, _)| *sub_id != id);
    }

    /// Invoke every subscriber with `payload`. The subscriber list is cloned
    /// out first so handlers may attach/detach without deadlocking.
    pub fn trigger(&self, payload: &T) {
        let subscribers: Vec<Subscriber<T>> =
            self.lock().iter().map(|(_, f)| Arc::clone(f)).collect();
        for subscriber in subscribers {
            subscriber(payload);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Subscriber<T>)>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A message was rejected by the parser.
#[derive(Clone, Debug)]
pub struct MessageRejectedEvent {
    pub peer: NodeId,
    pub reason: String,
}

/// A scheduler dropped a buffered message.
#[derive(Clone, Debug)]
pub struct MessageDiscardedEvent {
    pub message_id: MessageId,
    pub issuer: NodeId,
}

/// The node's synced state flipped.
#[derive(Clone, Debug)]
pub struct SyncChangedEvent {
    pub synced: bool,
}

#[derive(Default)]
pub struct StorageEvents {
    pub message_stored: Event<MessageId>,
    pub missing_message: Event<MessageId>,
    pub message_removed: Event<MessageId>,
}

#[derive(Default)]
pub struct ParserEvents {
    pub message_rejected: Event<MessageRejectedEvent>,
}

#[derive(Default)]
pub struct SolidifierEvents {
    pub message_solid: Event<MessageId>,
    pub message_invalid: Event<MessageId>,
}

#[derive(Default)]
pub struct SchedulerEvents {
    pub message_scheduled: Event<MessageId>,
    pub message_discarded: Event<MessageDiscardedEvent>,
    pub node_blacklisted: Event<NodeId>,
}

#[derive(Default)]
pub struct BookerEvents {
    pub message_booked: Event<MessageId>,
    pub message_invalid: Event<MessageId>,
}

#[derive(Default)]
pub struct TangleEvents {
    pub sync_changed: Event<SyncChangedEvent>,
}
