//! Resolution counters.
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals of resolution outcomes.
#[derive(Debug, Default)]
pub struct RollForwardStatus {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    active: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of a [`RollForwardStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Cells stamped committed.
    pub committed: u64,
    /// Cells stamped rolled back.
    pub rolled_back: u64,
    /// Lookups that found the writer still running.
    pub active: u64,
    /// Events refused by the queue.
    pub dropped: u64,
}

impl RollForwardStatus {
    /// A cell was stamped committed.
    pub fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    /// A cell was stamped rolled back.
    pub fn record_rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// The writer was still active.
    pub fn record_active(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was dropped.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current totals.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
