//! The rate setter paces locally issued messages to this node's fair,
//! mana-weighted share of the global scheduler bandwidth.
//!
//! An AIMD controller adjusts the local issuance rate: scheduler discards of
//! our own messages multiply the rate down; clean issues add a small step
//! back, capped at the fair share.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tangle_types::NodeId;

use crate::error::TangleError;
use crate::scheduler::ManaOracle;

#[derive(Clone, Debug)]
pub struct RateSetterConfig {
    /// Initial issuance rate in messages per second.
    pub initial: f64,
    /// Multiplicative decrease applied on an own-message discard.
    pub decrease_factor: f64,
    /// Additive increase (messages per second) applied on a clean issue.
    pub increase_step: f64,
    /// Lower bound on the issuance rate.
    pub min_rate: f64,
    /// The scheduler's global rate (time per message); the fair-share ceiling
    /// is derived from it.
    pub scheduler_rate: Duration,
}

impl Default for RateSetterConfig {
    fn default() -> Self {
        Self {
            initial: 1.0,
            decrease_factor: 0.7,
            increase_step: 0.05,
            min_rate: 0.05,
            scheduler_rate: Duration::from_millis(5),
        }
    }
}

struct RateState {
    rate: f64,
    last_issue: Option<Instant>,
}

pub struct RateSetter {
    state: Mutex<RateState>,
    own_node: NodeId,
    mana: Arc<dyn ManaOracle>,
    config: RateSetterConfig,
}

impl RateSetter {
    pub fn new(config: RateSetterConfig, own_node: NodeId, mana: Arc<dyn ManaOracle>) -> Self {
        Self {
            state: Mutex::new(RateState {
                rate: config.initial.max(config.min_rate),
                last_issue: None,
            }),
            own_node,
            mana,
            config,
        }
    }

    pub fn own_node(&self) -> NodeId {
        self.own_node
    }

    /// Current issuance rate in messages per second.
    pub fn current_rate(&self) -> f64 {
        self.lock().rate
    }

    /// This node's fair share of the global scheduler bandwidth, in messages
    /// per second.
    pub fn fair_share(&self) -> f64 {
        let total = self.mana.total_access_mana();
        let share = if total > 0.0 {
            self.mana.access_mana(&self.own_node) / total
        } else {
            0.0
        };
        let global = 1.0 / self.config.scheduler_rate.as_secs_f64();
        (global * share).max(self.config.min_rate)
    }

    /// The scheduler discarded one of our own messages: back off.
    pub fn on_own_discard(&self) {
        let mut state = self.lock();
        state.rate = (state.rate * self.config.decrease_factor).max(self.config.min_rate);
        tracing::info!(rate = state.rate, "issuance rate decreased after discard");
    }

    /// An issue went through cleanly: creep back towards the fair share.
    pub fn on_clean_issue(&self) {
        let ceiling = self.fair_share();
        let mut state = self.lock();
        state.rate = (state.rate + self.config.increase_step).min(ceiling.max(state.rate));
    }

    /// The pause still owed before the next issuance may proceed.
    pub fn required_pause(&self) -> Duration {
        let state = self.lock();
        let interval = Duration::from_secs_f64(1.0 / state.rate.max(self.config.min_rate));
        match state.last_issue {
            Some(last) => interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Block until this node may issue its next message. Cancels promptly
    /// with [`TangleError::Shutdown`] when the shutdown signal fires.
    pub async fn pace(
        &self,
        shutdown: &mut tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), TangleError> {
        let pause = self.required_pause();
        if !pause.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.recv() => return Err(TangleError::Shutdown),
            }
        }
        self.lock().last_issue = Some(Instant::now());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
