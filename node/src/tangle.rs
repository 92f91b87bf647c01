//! The tangle orchestrator: owns the components, wires the event flow
//! (stored → solid → scheduled → booked → opinion), runs the sync monitor,
//! and coordinates the one-shot handoff from the bootstrap FIFO scheduler to
//! the mana-weighted scheduler.
//!
//! All collaborators (blob store, node identity, mana oracle, consensus) are
//! explicit construction dependencies; there is no process-wide state beyond
//! the persistent store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tangle_ledger::{LedgerState, Snapshot};
use tangle_store::BlobStore;
use tangle_types::{KeyPair, MessageId, NodeId, Timestamp, TransactionId};

use crate::booker::Booker;
use crate::config::TangleConfig;
use crate::consensus::OpinionProvider;
use crate::error::TangleError;
use crate::events::{SyncChangedEvent, TangleEvents};
use crate::fifo_scheduler::FifoScheduler;
use crate::message::{Message, Payload};
use crate::message_factory::MessageFactory;
use crate::parser::Parser;
use crate::rate_setter::RateSetter;
use crate::scheduler::{ManaOracle, Scheduler};
use crate::solidifier::Solidifier;
use crate::storage::Storage;
use crate::time_manager::TimeManager;
use crate::tip_selector::TipSelector;

/// Broadcasts the shutdown signal to every worker task.
struct ShutdownController {
    tx: broadcast::Sender<()>,
}

impl ShutdownController {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

pub struct Tangle {
    pub config: TangleConfig,
    pub storage: Arc<Storage>,
    pub ledger: Arc<LedgerState>,
    pub parser: Arc<Parser>,
    pub solidifier: Arc<Solidifier>,
    pub fifo_scheduler: Arc<FifoScheduler>,
    pub scheduler: Arc<Scheduler>,
    pub rate_setter: Arc<RateSetter>,
    pub booker: Arc<Booker>,
    pub time_manager: Arc<TimeManager>,
    pub tip_selector: Arc<TipSelector>,
    pub factory: Arc<MessageFactory>,
    pub events: Arc<TangleEvents>,
    consensus: Arc<dyn OpinionProvider>,
    own_node: NodeId,
    shutdown: ShutdownController,
    /// The scheduler handoff happened (one-shot).
    handoff_done: Arc<AtomicBool>,
    /// Last synced state observed by the monitor.
    synced: AtomicBool,
    wired: AtomicBool,
    is_shutdown: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Tangle {
    /// Build a tangle over the given blob store and collaborators. Loads the
    /// configured snapshot, if any. Call [`setup`](Self::setup) to wire the
    /// event flow and [`start`](Self::start) to spawn the worker loops.
    pub fn new(
        config: TangleConfig,
        blob: Arc<dyn BlobStore>,
        identity: KeyPair,
        mana: Arc<dyn ManaOracle>,
        consensus: Arc<dyn OpinionProvider>,
    ) -> Result<Arc<Self>, TangleError> {
        let cache_time = config.cache_time();
        let storage = Arc::new(Storage::new(Arc::clone(&blob), cache_time));
        let ledger = Arc::new(LedgerState::new(blob, cache_time)?);

        if !config.snapshot_file.is_empty() {
            let bytes = std::fs::read(&config.snapshot_file)?;
            ledger.load_snapshot(Snapshot::from_bytes(&bytes)?)?;
            tracing::info!(path = %config.snapshot_file, "loaded ledger snapshot");
        }

        let own_node = tangle_crypto::node_id(&identity.public);
        let solidifier = Arc::new(Solidifier::new(Arc::clone(&storage)));
        let fifo_scheduler = Arc::new(FifoScheduler::new(config.fifo_config()));
        let scheduler = Arc::new(Scheduler::new(config.scheduler_config(), Arc::clone(&mana)));
        let rate_setter = Arc::new(RateSetter::new(
            config.rate_setter_config(),
            own_node,
            Arc::clone(&mana),
        ));
        let booker = Arc::new(Booker::new(
            Arc::clone(&storage),
            Arc::clone(&ledger),
            config.lazy_book_max_retries,
        ));
        let parser = Arc::new(Parser::new(config.pow_difficulty));
        let factory = Arc::new(MessageFactory::new(identity, config.pow_difficulty));
        let time_manager = Arc::new(TimeManager::new(config.time_window_secs, config.start_synced));

        Ok(Arc::new(Self {
            config,
            storage,
            ledger,
            parser,
            solidifier,
            fifo_scheduler,
            scheduler,
            rate_setter,
            booker,
            time_manager,
            tip_selector: Arc::new(TipSelector::new()),
            factory,
            events: Arc::new(TangleEvents::default()),
            consensus,
            own_node,
            shutdown: ShutdownController::new(),
            handoff_done: Arc::new(AtomicBool::new(false)),
            synced: AtomicBool::new(false),
            wired: AtomicBool::new(false),
            is_shutdown: AtomicBool::new(false),
            task_handles: Mutex::new(Vec::new()),
        }))
    }

    /// The local node's identity.
    pub fn own_node(&self) -> NodeId {
        self.own_node
    }

    /// Wire the event flow between the components. Must be called once,
    /// before any message is processed.
    pub fn setup(&self) {
        if self.wired.swap(true, Ordering::AcqRel) {
            return;
        }

        // stored → track time, solidify
        {
            let storage = Arc::clone(&self.storage);
            let solidifier = Arc::clone(&self.solidifier);
            let time_manager = Arc::clone(&self.time_manager);
            self.storage.events.message_stored.attach(move |id| {
                if let Ok(Some(view)) = storage.message(id) {
                    time_manager.update(view.read(|m| m.issuing_time));
                }
                solidifier.solidify(*id);
            });
        }

        // solid → tips, admission into the active scheduler
        {
            let storage = Arc::clone(&self.storage);
            let scheduler = Arc::clone(&self.scheduler);
            let fifo = Arc::clone(&self.fifo_scheduler);
            let tips = Arc::clone(&self.tip_selector);
            self.solidifier.events.message_solid.attach(move |id| {
                let Ok(Some(view)) = storage.message(id) else {
                    return;
                };
                let message = view.cloned();
                tips.update(&message);
                let issuer = message.issuer();
                if scheduler.is_active() {
                    scheduler.submit(*id, issuer, message.sequence_number);
                } else {
                    fifo.submit(*id, issuer, Timestamp::now());
                }
            });
        }

        // scheduled → mark metadata, book
        let schedule_handler = |storage: Arc<Storage>,
                                booker: Arc<Booker>,
                                shutdown: broadcast::Sender<()>| {
            move |id: &MessageId| {
                if let Ok(Some(view)) = storage.message_metadata(id) {
                    let _ = view.write(|m| m.set_scheduled());
                }
                if let Err(e) = booker.book(*id) {
                    // storage faults are fatal: stop the pipeline
                    tracing::error!(error = %e, "storage fault while booking, shutting down");
                    let _ = shutdown.send(());
                }
            }
        };
        self.fifo_scheduler.events.message_scheduled.attach(schedule_handler(
            Arc::clone(&self.storage),
            Arc::clone(&self.booker),
            self.shutdown.tx.clone(),
        ));
        self.scheduler.events.message_scheduled.attach(schedule_handler(
            Arc::clone(&self.storage),
            Arc::clone(&self.booker),
            self.shutdown.tx.clone(),
        ));

        // own discards feed the rate setter's AIMD controller
        {
            let rate_setter = Arc::clone(&self.rate_setter);
            self.scheduler.events.message_discarded.attach(move |event| {
                if event.issuer == rate_setter.own_node() {
                    rate_setter.on_own_discard();
                }
            });
        }

        // booked → consensus opinion, eligibility, finalization
        {
            let storage = Arc::clone(&self.storage);
            let ledger = Arc::clone(&self.ledger);
            let consensus = Arc::clone(&self.consensus);
            self.booker.events.message_booked.attach(move |id| {
                let opinion = consensus.form_opinion(id);
                if opinion.liked {
                    if let Ok(Some(view)) = storage.message_metadata(id) {
                        let _ = view.write(|m| m.set_eligible());
                    }
                }
                if opinion.liked && opinion.finalized {
                    if let Ok(Some(view)) = storage.message(id) {
                        if let Some(tx) = view.read(|m| m.payload.as_transaction().cloned()) {
                            if let Err(e) = ledger.confirm_transaction(&tx) {
                                tracing::warn!(error = %e, "transaction finalization failed");
                            }
                        }
                    }
                }
            });
        }

        // missing parents would be requested from gossip here
        self.storage.events.missing_message.attach(|id| {
            tracing::debug!(message_id = %id, "parent missing, requesting from peers");
        });
    }

    /// Feed untrusted gossip bytes into the pipeline. Parse failures are
    /// silent drops (the parser has already fired `MessageRejected`).
    pub fn process_gossip_message(&self, bytes: &[u8], peer: NodeId) -> Result<(), TangleError> {
        let Ok(message) = self.parser.parse(bytes, peer) else {
            return Ok(());
        };
        self.storage.store_message(message, Timestamp::now())?;
        Ok(())
    }

    /// Construct, pace, and submit a locally issued message carrying
    /// `payload`. Blocks on the rate setter until this node may issue;
    /// cancels promptly with [`TangleError::Shutdown`] on shutdown.
    pub async fn issue_payload(&self, payload: Payload) -> Result<Message, TangleError> {
        if self.is_shutdown.load(Ordering::Acquire) {
            return Err(TangleError::Shutdown);
        }
        let mut shutdown_rx = self.shutdown.subscribe();
        self.rate_setter.pace(&mut shutdown_rx).await?;

        let strong_parents = self.tip_selector.select(self.config.width);
        let message = self
            .factory
            .create(strong_parents, Vec::new(), payload, Timestamp::now())?;
        self.storage
            .store_message(message.clone(), Timestamp::now())?;
        self.rate_setter.on_clean_issue();
        Ok(message)
    }

    /// One iteration of the sync monitor: recompute the synced state, fire
    /// `SyncChanged` on a flip, adjust the scheduler rate, and perform the
    /// one-shot scheduler handoff on the first transition to synced.
    pub fn run_sync_check(&self) {
        let now = Timestamp::now();
        let synced = self.time_manager.synced(now);
        let previous = self.synced.swap(synced, Ordering::AcqRel);
        if previous == synced {
            return;
        }

        tracing::info!(synced, "sync changed");
        self.events.sync_changed.trigger(&SyncChangedEvent { synced });

        if synced {
            if !self.handoff_done.swap(true, Ordering::AcqRel) {
                // the documented handoff order; no message is lost and none
                // is dispatched twice
                self.scheduler.setup(); // start buffering solid messages
                self.fifo_scheduler.detach(); // stop receiving more messages
                let drained = self.fifo_scheduler.shutdown(); // schedule remaining messages
                self.scheduler.start(); // start the actual scheduler
                self.fifo_scheduler.clear_blacklist();
                tracing::info!(drained, "scheduler handoff complete");
            }
            self.scheduler.set_rate(self.config.scheduler_rate());
        } else {
            // catch-up mode: 50% above the configured rate
            self.scheduler.set_rate(self.config.unsynced_scheduler_rate());
        }
    }

    /// Spawn the worker loops: FIFO dispatcher, steady-state dispatcher, and
    /// the sync monitor.
    pub fn start(self: &Arc<Self>) {
        let mut handles = match self.task_handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // bootstrap FIFO dispatcher: runs until the handoff
        {
            let fifo = Arc::clone(&self.fifo_scheduler);
            let handoff_done = Arc::clone(&self.handoff_done);
            let mut shutdown_rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {
                            if handoff_done.load(Ordering::Acquire) {
                                break;
                            }
                            while fifo.dispatch_next().is_some() {}
                        }
                    }
                }
            }));
        }

        // steady-state dispatcher: one message per rate tick
        {
            let scheduler = Arc::clone(&self.scheduler);
            let mut shutdown_rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(scheduler.rate()) => {
                            if scheduler.is_started() {
                                scheduler.schedule_next();
                            }
                        }
                    }
                }
            }));
        }

        // sync monitor
        {
            let tangle = Arc::clone(self);
            let mut shutdown_rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {
                            tangle.run_sync_check();
                        }
                    }
                }
            }));
        }
    }

    /// Block until a message carrying `transaction_id` is booked, up to
    /// `max_await`. Returns the carrying message's id, or
    /// [`TangleError::AwaitTimeout`] with no side effects.
    pub async fn await_transaction_booked(
        &self,
        transaction_id: TransactionId,
        max_await: Duration,
    ) -> Result<MessageId, TangleError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let storage = Arc::clone(&self.storage);
        let target = transaction_id;
        let subscription = self.booker.events.message_booked.attach(move |id| {
            let Ok(Some(view)) = storage.message(id) else {
                return;
            };
            let matches = view.read(|m| {
                m.payload
                    .as_transaction()
                    .map(|t| t.id() == target)
                    .unwrap_or(false)
            });
            if matches {
                let _ = tx.send(*id);
            }
        });

        // a booked attachment may already exist
        let mut already_booked = None;
        if let Ok(attachments) = self.storage.attachments(&transaction_id) {
            for attachment in attachments {
                if let Ok(Some(view)) = self.storage.message_metadata(&attachment.message_id) {
                    if view.read(|m| m.is_booked()) {
                        already_booked = Some(attachment.message_id);
                        break;
                    }
                }
            }
        }

        let result = match already_booked {
            Some(id) => Ok(id),
            None => match tokio::time::timeout(max_await, rx.recv()).await {
                Ok(Some(id)) => Ok(id),
                _ => Err(TangleError::AwaitTimeout),
            },
        };
        self.booker.events.message_booked.detach(subscription);
        result
    }

    /// Block until `message_id` has been dispatched by a scheduler, up to
    /// `max_await`.
    pub async fn await_message_scheduled(
        &self,
        message_id: MessageId,
        max_await: Duration,
    ) -> Result<(), TangleError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let make_handler = || {
            let tx = tx.clone();
            move |id: &MessageId| {
                if *id == message_id {
                    let _ = tx.send(());
                }
            }
        };
        let fifo_subscription = self
            .fifo_scheduler
            .events
            .message_scheduled
            .attach(make_handler());
        let scheduler_subscription = self
            .scheduler
            .events
            .message_scheduled
            .attach(make_handler());

        let already_scheduled = match self.storage.message_metadata(&message_id) {
            Ok(Some(view)) => view.read(|m| m.is_scheduled()),
            _ => false,
        };

        let result = if already_scheduled {
            Ok(())
        } else {
            match tokio::time::timeout(max_await, rx.recv()).await {
                Ok(Some(())) => Ok(()),
                _ => Err(TangleError::AwaitTimeout),
            }
        };
        self.fifo_scheduler
            .events
            .message_scheduled
            .detach(fifo_subscription);
        self.scheduler
            .events
            .message_scheduled
            .detach(scheduler_subscription);
        result
    }

    /// Graceful shutdown: cancel the monitor and dispatcher loops, drain the
    /// bootstrap queue, join the workers (bounded by `wait_to_kill`), and
    /// flush the storage caches. Idempotent.
    pub async fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("tangle shutting down");
        self.shutdown.trigger();

        self.scheduler.stop();
        if !self.fifo_scheduler.is_detached() {
            let drained = self.fifo_scheduler.shutdown();
            if drained > 0 {
                tracing::info!(drained, "drained bootstrap queue during shutdown");
            }
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = match self.task_handles.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.drain(..).collect()
        };
        let deadline = Duration::from_secs(self.config.wait_to_kill_secs);
        for handle in handles {
            if tokio::time::timeout(deadline, handle).await.is_err() {
                tracing::warn!("worker did not stop within the shutdown deadline");
            }
        }

        self.storage.flush();
        self.ledger.flush();
    }
}
