//! Tangle configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::TangleError;
use crate::fifo_scheduler::FifoSchedulerConfig;
use crate::rate_setter::RateSetterConfig;
use crate::scheduler::SchedulerConfig;

/// Configuration for the tangle core.
///
/// Can be loaded from a TOML file via [`TangleConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TangleConfig {
    /// Number of tips referenced by locally issued messages.
    #[serde(default = "default_width")]
    pub width: usize,

    /// Synced threshold: maximum age in seconds of the latest message.
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: u64,

    /// Treat the node as synced from the start.
    #[serde(default)]
    pub start_synced: bool,

    /// Steady-state scheduler: time per message, in milliseconds.
    #[serde(default = "default_scheduler_rate_ms")]
    pub scheduler_rate_ms: u64,

    /// Steady-state scheduler: buffered messages allowed per issuer.
    #[serde(default = "default_max_buffer_per_node")]
    pub scheduler_max_buffer_per_node: usize,

    /// Steady-state scheduler: zero-mana ticks before blacklisting.
    #[serde(default = "default_zero_mana_strikes")]
    pub scheduler_zero_mana_strikes: u32,

    /// Bootstrap scheduler: submissions allowed per node per second.
    #[serde(default = "default_fifo_max_messages_per_second")]
    pub fifo_max_messages_per_second: u32,

    /// Bootstrap scheduler: violations before blacklisting.
    #[serde(default = "default_fifo_blacklist_threshold")]
    pub fifo_blacklist_threshold: u32,

    /// Bootstrap scheduler: blacklist entry lifetime in seconds.
    #[serde(default = "default_fifo_blacklist_ttl_secs")]
    pub fifo_blacklist_ttl_secs: u64,

    /// Initial local issuance rate, messages per second.
    #[serde(default = "default_rate_setter_initial")]
    pub rate_setter_initial: f64,

    /// Snapshot file path; empty means no snapshot is loaded.
    #[serde(default)]
    pub snapshot_file: String,

    /// Average network propagation delay in seconds; the consensus liked /
    /// locally-finalized thresholds derive from it (1× and 2×).
    #[serde(default = "default_average_network_delay_secs")]
    pub fcob_average_network_delay_secs: u64,

    /// Seconds to wait for workers during graceful shutdown.
    #[serde(default = "default_wait_to_kill_secs")]
    pub wait_to_kill_secs: u64,

    /// Message proof-of-work difficulty threshold.
    #[serde(default)]
    pub pow_difficulty: u64,

    /// Minimum in-memory retention of released storage views, in seconds.
    #[serde(default = "default_cache_time_secs")]
    pub cache_time_secs: u64,

    /// Retries for a transaction with missing inputs before its message is
    /// marked lazy-booked.
    #[serde(default = "default_lazy_book_max_retries")]
    pub lazy_book_max_retries: u32,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_width() -> usize {
    2
}

fn default_time_window_secs() -> u64 {
    30
}

fn default_scheduler_rate_ms() -> u64 {
    5
}

fn default_max_buffer_per_node() -> usize {
    100
}

fn default_zero_mana_strikes() -> u32 {
    10
}

fn default_fifo_max_messages_per_second() -> u32 {
    50
}

fn default_fifo_blacklist_threshold() -> u32 {
    3
}

fn default_fifo_blacklist_ttl_secs() -> u64 {
    60
}

fn default_rate_setter_initial() -> f64 {
    1.0
}

fn default_average_network_delay_secs() -> u64 {
    5
}

fn default_wait_to_kill_secs() -> u64 {
    120
}

fn default_cache_time_secs() -> u64 {
    60
}

fn default_lazy_book_max_retries() -> u32 {
    3
}

// ── Impl ───────────────────────────────────────────────────────────────

impl TangleConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, TangleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, TangleError> {
        toml::from_str(s).map_err(|e| TangleError::Config(e.to_string()))
    }

    pub fn scheduler_rate(&self) -> Duration {
        Duration::from_millis(self.scheduler_rate_ms)
    }

    /// The scheduler rate used while not synced: 50% above the configured
    /// rate, to let the node catch up.
    pub fn unsynced_scheduler_rate(&self) -> Duration {
        self.scheduler_rate() * 2 / 3
    }

    pub fn cache_time(&self) -> Duration {
        Duration::from_secs(self.cache_time_secs)
    }

    /// Consensus threshold after which a message may be liked.
    pub fn liked_threshold(&self) -> Duration {
        Duration::from_secs(self.fcob_average_network_delay_secs)
    }

    /// Consensus threshold after which an opinion is locally final.
    pub fn locally_finalized_threshold(&self) -> Duration {
        Duration::from_secs(self.fcob_average_network_delay_secs * 2)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            rate: self.scheduler_rate(),
            max_buffer_per_node: self.scheduler_max_buffer_per_node,
            zero_mana_strikes: self.scheduler_zero_mana_strikes,
        }
    }

    pub fn fifo_config(&self) -> FifoSchedulerConfig {
        FifoSchedulerConfig {
            max_messages_per_second: self.fifo_max_messages_per_second,
            blacklist_threshold: self.fifo_blacklist_threshold,
            blacklist_ttl_secs: self.fifo_blacklist_ttl_secs,
        }
    }

    pub fn rate_setter_config(&self) -> RateSetterConfig {
        RateSetterConfig {
            initial: self.rate_setter_initial,
            scheduler_rate: self.scheduler_rate(),
            ..RateSetterConfig::default()
        }
    }
}

impl Default for TangleConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            time_window_secs: default_time_window_secs(),
            start_synced: false,
            scheduler_rate_ms: default_scheduler_rate_ms(),
            scheduler_max_buffer_per_node: default_max_buffer_per_node(),
            scheduler_zero_mana_strikes: default_zero_mana_strikes(),
            fifo_max_messages_per_second: default_fifo_max_messages_per_second(),
            fifo_blacklist_threshold: default_fifo_blacklist_threshold(),
            fifo_blacklist_ttl_secs: default_fifo_blacklist_ttl_secs(),
            rate_setter_initial: default_rate_setter_initial(),
            snapshot_file: String::new(),
            fcob_average_network_delay_secs: default_average_network_delay_secs(),
            wait_to_kill_secs: default_wait_to_kill_secs(),
            pow_difficulty: 0,
            cache_time_secs: default_cache_time_secs(),
            lazy_book_max_retries: default_lazy_book_max_retries(),
        }
    }
}
