//! Tracks the issuing time of the latest seen message and derives the
//! node's synced state from it.

use std::sync::atomic::{AtomicU64, Ordering};

use tangle_types::Timestamp;

pub struct TimeManager {
    /// Issuing time of the latest message seen, as Unix seconds (0 = none).
    last_message_time: AtomicU64,
    /// A node is synced while the latest message is at most this old.
    time_window_secs: u64,
    /// Treat the node as synced from the start (single-node setups, tests).
    start_synced: bool,
}

impl TimeManager {
    pub fn new(time_window_secs: u64, start_synced: bool) -> Self {
        Self {
            last_message_time: AtomicU64::new(0),
            time_window_secs,
            start_synced,
        }
    }

    /// Track a message's issuing time; only moves forward.
    pub fn update(&self, issuing_time: Timestamp) {
        self.last_message_time
            .fetch_max(issuing_time.as_secs(), Ordering::AcqRel);
    }

    pub fn last_message_time(&self) -> Timestamp {
        Timestamp::new(self.last_message_time.load(Ordering::Acquire))
    }

    /// Whether the node is synced at `now`: the latest message's age lies
    /// within the time window.
    pub fn synced(&self, now: Timestamp) -> bool {
        if self.start_synced {
            return true;
        }
        let last = self.last_message_time.load(Ordering::Acquire);
        if last == 0 {
            return false;
        }
        Timestamp::new(last).elapsed_since(now) <= self.time_window_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_synced_before_any_message() {
        let manager = TimeManager::new(30, false);
        assert!(!manager.synced(Timestamp::new(1000)));
    }

    #[test]
    fn synced_while_recent_and_stale_after_window() {
        let manager = TimeManager::new(30, false);
        manager.update(Timestamp::new(1000));
        assert!(manager.synced(Timestamp::new(1029)));
        assert!(manager.synced(Timestamp::new(1030)));
        assert!(!manager.synced(Timestamp::new(1031)));
    }

    #[test]
    fn update_only_moves_forward() {
        let manager = TimeManager::new(30, false);
        manager.update(Timestamp::new(1000));
        manager.update(Timestamp::new(900));
        assert_eq!(manager.last_message_time(), Timestamp::new(1000));
    }

    #[test]
    fn start_synced_overrides() {
        let manager = TimeManager::new(30, true);
        assert!(manager.synced(Timestamp::new(1)));
    }
}
