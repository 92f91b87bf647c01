//! The steady-state scheduler: mana-weighted deficit round-robin over
//! per-issuer buffers, dispatching at a configurable global rate.
//!
//! Each tick distributes one unit of deficit across the issuers with
//! buffered messages, proportional to their share of the active access
//! mana. A message is dispatched when its issuer's deficit covers the unit
//! cost; ties break by earliest arrival. Within one issuer, messages
//! dispatch in ascending sequence number.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tangle_types::{MessageId, NodeId};

use crate::events::{MessageDiscardedEvent, SchedulerEvents};

/// The cost of dispatching one message, in deficit units.
const MESSAGE_COST: f64 = 1.0;

/// Per-identity reputation oracle. Opaque to the scheduler; the node wires in
/// the mana module's view.
pub trait ManaOracle: Send + Sync {
    fn access_mana(&self, node: &NodeId) -> f64;
    fn total_access_mana(&self) -> f64;
}

/// A fixed (but mutable) mana table, for tests and single-node setups.
#[derive(Default)]
pub struct StaticMana {
    weights: RwLock<HashMap<NodeId, f64>>,
}

impl StaticMana {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(entries: &[(NodeId, f64)]) -> Self {
        let mana = Self::new();
        for (node, weight) in entries {
            mana.set(*node, *weight);
        }
        mana
    }

    pub fn set(&self, node: NodeId, mana: f64) {
        self.weights
            .write()
            .expect("mana table lock poisoned")
            .insert(node, mana);
    }
}

impl ManaOracle for StaticMana {
    fn access_mana(&self, node: &NodeId) -> f64 {
        self.weights
            .read()
            .expect("mana table lock poisoned")
            .get(node)
            .copied()
            .unwrap_or(0.0)
    }

    fn total_access_mana(&self) -> f64 {
        self.weights
            .read()
            .expect("mana table lock poisoned")
            .values()
            .sum()
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Time per dispatched message.
    pub rate: Duration,
    /// Buffered messages allowed per issuer; the oldest is discarded beyond
    /// this.
    pub max_buffer_per_node: usize,
    /// Consecutive ticks an issuer may sit at zero mana with buffered
    /// messages before it is blacklisted.
    pub zero_mana_strikes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rate: Duration::from_millis(5),
            max_buffer_per_node: 100,
            zero_mana_strikes: 10,
        }
    }
}

struct BufferedMessage {
    message_id: MessageId,
    sequence_number: u64,
    arrival: u64,
}

#[derive(Default)]
struct NodeQueue {
    messages: VecDeque<BufferedMessage>,
    deficit: f64,
    zero_mana_ticks: u32,
}

#[derive(Default)]
struct SchedulerInner {
    queues: HashMap<NodeId, NodeQueue>,
    arrival_counter: u64,
}

pub struct Scheduler {
    inner: Mutex<SchedulerInner>,
    rate_nanos: AtomicU64,
    /// Buffering admissions (post-`setup`).
    active: AtomicBool,
    /// Dispatching (post-`start`).
    started: AtomicBool,
    mana: Arc<dyn ManaOracle>,
    config: SchedulerConfig,
    pub events: SchedulerEvents,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, mana: Arc<dyn ManaOracle>) -> Self {
        Self {
            inner: Mutex::new(SchedulerInner::default()),
            rate_nanos: AtomicU64::new(config.rate.as_nanos() as u64),
            active: AtomicBool::new(false),
            started: AtomicBool::new(false),
            mana,
            config,
            events: SchedulerEvents::default(),
        }
    }

    /// Begin buffering solid messages (the first step of the sync handoff).
    pub fn setup(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Begin dispatching (the last step of the sync handoff).
    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::Release);
    }

    /// Atomically update the dispatch rate; takes effect on the next tick.
    pub fn set_rate(&self, rate: Duration) {
        self.rate_nanos.store(rate.as_nanos() as u64, Ordering::Release);
    }

    pub fn rate(&self) -> Duration {
        Duration::from_nanos(self.rate_nanos.load(Ordering::Acquire))
    }

    /// Admit a solid message into its issuer's buffer. Messages are kept in
    /// ascending sequence-number order per issuer; exceeding the buffer cap
    /// discards the oldest buffered message of that issuer.
    ///
    /// Returns `false` when the scheduler is not buffering yet.
    pub fn submit(&self, message_id: MessageId, issuer: NodeId, sequence_number: u64) -> bool {
        if !self.is_active() {
            return false;
        }

        let discarded = {
            let mut inner = self.lock();
            inner.arrival_counter += 1;
            let arrival = inner.arrival_counter;

            let queue = inner.queues.entry(issuer).or_default();
            let position = queue
                .messages
                .iter()
                .position(|m| m.sequence_number > sequence_number)
                .unwrap_or(queue.messages.len());
            queue.messages.insert(
                position,
                BufferedMessage {
                    message_id,
                    sequence_number,
                    arrival,
                },
            );

            if queue.messages.len() > self.config.max_buffer_per_node {
                queue.messages.pop_front()
            } else {
                None
            }
        };

        if let Some(dropped) = discarded {
            tracing::info!(message_id = %dropped.message_id, node = %issuer, "scheduler buffer overflow");
            self.events.message_discarded.trigger(&MessageDiscardedEvent {
                message_id: dropped.message_id,
                issuer,
            });
        }
        true
    }

    /// One dispatch tick: replenish deficits and release the eligible message
    /// with the earliest arrival, if any. Fires `MessageScheduled` for the
    /// dispatched message and handles zero-mana blacklisting.
    pub fn schedule_next(&self) -> Option<MessageId> {
        let mut blacklisted: Vec<(NodeId, Vec<MessageId>)> = Vec::new();

        let dispatched = {
            let mut inner = self.lock();
            let active_nodes: Vec<NodeId> = inner
                .queues
                .iter()
                .filter(|(_, queue)| !queue.messages.is_empty())
                .map(|(node, _)| *node)
                .collect();
            if active_nodes.is_empty() {
                return None;
            }

            let active_mana: f64 = active_nodes
                .iter()
                .map(|node| self.mana.access_mana(node))
                .sum();

            for node in &active_nodes {
                let mana = self.mana.access_mana(node);
                let queue = inner.queues.entry(*node).or_default();
                if mana <= 0.0 || active_mana <= 0.0 {
                    queue.zero_mana_ticks += 1;
                    if queue.zero_mana_ticks >= self.config.zero_mana_strikes {
                        let dropped = inner
                            .queues
                            .remove(node)
                            .map(|q| q.messages.into_iter().map(|m| m.message_id).collect())
                            .unwrap_or_default();
                        blacklisted.push((*node, dropped));
                    }
                    continue;
                }
                queue.zero_mana_ticks = 0;
                queue.deficit = (queue.deficit + mana / active_mana)
                    .min(self.config.max_buffer_per_node as f64);
            }

            // among eligible issuers, the earliest-arrived head message wins
            let winner = inner
                .queues
                .iter()
                .filter(|(_, queue)| queue.deficit >= MESSAGE_COST)
                .filter_map(|(node, queue)| queue.messages.front().map(|m| (*node, m.arrival)))
                .min_by_key(|(_, arrival)| *arrival)
                .map(|(node, _)| node);

            winner.and_then(|node| {
                let queue = inner.queues.get_mut(&node)?;
                queue.deficit -= MESSAGE_COST;
                queue.messages.pop_front().map(|m| m.message_id)
            })
        };

        for (node, dropped) in blacklisted {
            tracing::info!(node = %node, "node blacklisted in scheduler: sustained zero mana");
            for message_id in dropped {
                self.events.message_discarded.trigger(&MessageDiscardedEvent {
                    message_id,
                    issuer: node,
                });
            }
            self.events.node_blacklisted.trigger(&node);
        }

        if let Some(message_id) = dispatched {
            self.events.message_scheduled.trigger(&message_id);
        }
        dispatched
    }

    /// Total buffered messages across all issuers.
    pub fn buffered_len(&self) -> usize {
        self.lock()
            .queues
            .values()
            .map(|queue| queue.messages.len())
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
