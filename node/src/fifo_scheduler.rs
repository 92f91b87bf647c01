//! The bootstrap scheduler: plain FIFO dispatch while the node is not yet
//! synced, with a per-node submission-rate policy and an advisory blacklist.
//!
//! At the sync transition the orchestrator detaches it (no new admissions),
//! drains the residual queue synchronously to the booker, and hands over to
//! the mana-weighted steady-state scheduler.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tangle_types::{MessageId, NodeId, Timestamp};

use crate::events::{MessageDiscardedEvent, SchedulerEvents};

#[derive(Clone, Debug)]
pub struct FifoSchedulerConfig {
    /// Submissions allowed per node per second.
    pub max_messages_per_second: u32,
    /// Rate violations before the node is blacklisted.
    pub blacklist_threshold: u32,
    /// Blacklist entry lifetime. Advisory; the whole list is also cleared at
    /// the sync transition.
    pub blacklist_ttl_secs: u64,
}

impl Default for FifoSchedulerConfig {
    fn default() -> Self {
        Self {
            max_messages_per_second: 50,
            blacklist_threshold: 3,
            blacklist_ttl_secs: 60,
        }
    }
}

struct FifoInner {
    queue: VecDeque<MessageId>,
    /// per-node sliding one-second submission window: (window start, count)
    windows: HashMap<NodeId, (Timestamp, u32)>,
    violations: HashMap<NodeId, u32>,
    blacklist: HashMap<NodeId, Timestamp>,
    detached: bool,
}

pub struct FifoScheduler {
    inner: Mutex<FifoInner>,
    config: FifoSchedulerConfig,
    pub events: SchedulerEvents,
}

impl FifoScheduler {
    pub fn new(config: FifoSchedulerConfig) -> Self {
        Self {
            inner: Mutex::new(FifoInner {
                queue: VecDeque::new(),
                windows: HashMap::new(),
                violations: HashMap::new(),
                blacklist: HashMap::new(),
                detached: false,
            }),
            config,
            events: SchedulerEvents::default(),
        }
    }

    /// Admit a solid message. Returns `false` when the message was not
    /// enqueued (detached scheduler, blacklisted node, or rate violation).
    pub fn submit(&self, message_id: MessageId, issuer: NodeId, now: Timestamp) -> bool {
        enum Verdict {
            Enqueued,
            Discarded,
            DiscardedAndBlacklisted,
        }

        let verdict = {
            let mut inner = self.lock();
            if inner.detached {
                return false;
            }

            // expire a stale blacklist entry before consulting it
            if let Some(listed_at) = inner.blacklist.get(&issuer).copied() {
                if listed_at.has_expired(self.config.blacklist_ttl_secs, now) {
                    inner.blacklist.remove(&issuer);
                    inner.violations.remove(&issuer);
                }
            }

            if inner.blacklist.contains_key(&issuer) {
                Verdict::Discarded
            } else {
                let window = inner.windows.entry(issuer).or_insert((now, 0));
                if window.0 != now {
                    *window = (now, 0);
                }
                window.1 += 1;
                if window.1 > self.config.max_messages_per_second {
                    let violations = inner.violations.entry(issuer).or_insert(0);
                    *violations += 1;
                    if *violations >= self.config.blacklist_threshold {
                        inner.blacklist.insert(issuer, now);
                        Verdict::DiscardedAndBlacklisted
                    } else {
                        Verdict::Discarded
                    }
                } else {
                    inner.queue.push_back(message_id);
                    Verdict::Enqueued
                }
            }
        };

        match verdict {
            Verdict::Enqueued => true,
            Verdict::Discarded => {
                self.events.message_discarded.trigger(&MessageDiscardedEvent {
                    message_id,
                    issuer,
                });
                false
            }
            Verdict::DiscardedAndBlacklisted => {
                tracing::info!(node = %issuer, "node blacklisted in FIFO scheduler");
                self.events.message_discarded.trigger(&MessageDiscardedEvent {
                    message_id,
                    issuer,
                });
                self.events.node_blacklisted.trigger(&issuer);
                false
            }
        }
    }

    /// Dispatch the oldest queued message to the booker, firing
    /// `MessageScheduled`. Returns the dispatched id, if any.
    pub fn dispatch_next(&self) -> Option<MessageId> {
        let next = self.lock().queue.pop_front();
        if let Some(message_id) = next {
            self.events.message_scheduled.trigger(&message_id);
        }
        next
    }

    /// Stop accepting new submissions. Queued messages stay queued.
    pub fn detach(&self) {
        self.lock().detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.lock().detached
    }

    /// Detach and synchronously drain every residual message to the booker,
    /// in insertion order. Returns how many messages were dispatched.
    pub fn shutdown(&self) -> usize {
        self.detach();
        let mut drained = 0;
        while self.dispatch_next().is_some() {
            drained += 1;
        }
        drained
    }

    /// Forget all blacklist entries (sync transition).
    pub fn clear_blacklist(&self) {
        let mut inner = self.lock();
        inner.blacklist.clear();
        inner.violations.clear();
    }

    pub fn is_blacklisted(&self, node: &NodeId) -> bool {
        self.lock().blacklist.contains_key(node)
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FifoInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scheduler() -> FifoScheduler {
        FifoScheduler::new(FifoSchedulerConfig {
            max_messages_per_second: 2,
            blacklist_threshold: 2,
            blacklist_ttl_secs: 60,
        })
    }

    fn message(byte: u8) -> MessageId {
        MessageId::new([byte; 32])
    }

    fn node(byte: u8) -> NodeId {
        NodeId::new([byte; 32])
    }

    #[test]
    fn dispatch_preserves_insertion_order() {
        let fifo = scheduler();
        let now = Timestamp::new(1000);
        assert!(fifo.submit(message(1), node(1), now));
        assert!(fifo.submit(message(2), node(2), now));

        assert_eq!(fifo.dispatch_next(), Some(message(1)));
        assert_eq!(fifo.dispatch_next(), Some(message(2)));
        assert_eq!(fifo.dispatch_next(), None);
    }

    #[test]
    fn rate_violation_discards() {
        let fifo = scheduler();
        let discarded = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&discarded);
        fifo.events.message_discarded.attach(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let now = Timestamp::new(1000);
        assert!(fifo.submit(message(1), node(1), now));
        assert!(fifo.submit(message(2), node(1), now));
        // third submission in the same second exceeds the limit of 2
        assert!(!fifo.submit(message(3), node(1), now));
        assert_eq!(discarded.load(Ordering::SeqCst), 1);

        // a fresh second resets the window
        assert!(fifo.submit(message(4), node(1), Timestamp::new(1001)));
    }

    #[test]
    fn repeated_violations_blacklist_the_node() {
        let fifo = scheduler();
        let blacklisted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&blacklisted);
        fifo.events.node_blacklisted.attach(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let now = Timestamp::new(1000);
        fifo.submit(message(1), node(1), now);
        fifo.submit(message(2), node(1), now);
        fifo.submit(message(3), node(1), now); // violation 1
        fifo.submit(message(4), node(1), now); // violation 2 → blacklist
        assert_eq!(blacklisted.load(Ordering::SeqCst), 1);
        assert!(fifo.is_blacklisted(&node(1)));

        // blacklisted submissions are discarded even in a fresh window
        assert!(!fifo.submit(message(5), node(1), Timestamp::new(1001)));
    }

    #[test]
    fn blacklist_expires_after_ttl() {
        let fifo = scheduler();
        let now = Timestamp::new(1000);
        fifo.submit(message(1), node(1), now);
        fifo.submit(message(2), node(1), now);
        fifo.submit(message(3), node(1), now);
        fifo.submit(message(4), node(1), now);
        assert!(fifo.is_blacklisted(&node(1)));

        assert!(fifo.submit(message(5), node(1), Timestamp::new(1061)));
        assert!(!fifo.is_blacklisted(&node(1)));
    }

    #[test]
    fn clear_blacklist_resets_state() {
        let fifo = scheduler();
        let now = Timestamp::new(1000);
        fifo.submit(message(1), node(1), now);
        fifo.submit(message(2), node(1), now);
        fifo.submit(message(3), node(1), now);
        fifo.submit(message(4), node(1), now);
        assert!(fifo.is_blacklisted(&node(1)));

        fifo.clear_blacklist();
        assert!(!fifo.is_blacklisted(&node(1)));
        assert!(fifo.submit(message(5), node(1), Timestamp::new(1002)));
    }

    #[test]
    fn detached_scheduler_rejects_submissions() {
        let fifo = scheduler();
        fifo.submit(message(1), node(1), Timestamp::new(1000));
        fifo.detach();
        assert!(!fifo.submit(message(2), node(1), Timestamp::new(1000)));
        // the queued message survives detach
        assert_eq!(fifo.queue_len(), 1);
    }

    #[test]
    fn shutdown_drains_residuals_in_order() {
        let fifo = scheduler();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        fifo.events.message_scheduled.attach(move |id| {
            sink.lock().unwrap().push(*id);
        });

        let now = Timestamp::new(1000);
        fifo.submit(message(1), node(1), now);
        fifo.submit(message(2), node(2), now);
        fifo.submit(message(3), node(3), now);

        let drained = fifo.shutdown();
        assert_eq!(drained, 3);
        assert_eq!(fifo.queue_len(), 0);
        assert!(fifo.is_detached());
        assert_eq!(
            *order.lock().unwrap(),
            vec![message(1), message(2), message(3)]
        );
    }
}
