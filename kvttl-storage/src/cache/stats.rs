//! Counters describing what a cache entry has been doing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, shared by clones of an entry.
#[derive(Debug, Default)]
pub(crate) struct EntryCounters {
    pub fresh_reads: AtomicU64,
    pub stale_reads: AtomicU64,
    pub refreshes_started: AtomicU64,
    pub refreshes_applied: AtomicU64,
    pub refreshes_discarded: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub writes_started: AtomicU64,
    pub persist_failures: AtomicU64,
}

impl EntryCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub(crate) fn snapshot(&self) -> EntryStats {
        EntryStats {
            fresh_reads: self.fresh_reads.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_applied: self.refreshes_applied.load(Ordering::Relaxed),
            refreshes_discarded: self.refreshes_discarded.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            writes_started: self.writes_started.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of entry counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryStats {
    /// `get` calls answered without touching the store.
    pub fresh_reads: u64,
    /// Stale `get` calls answered immediately because a refresh was in flight.
    pub stale_reads: u64,
    /// Refresh reads issued to the store.
    pub refreshes_started: u64,
    /// Refreshes whose result was merged into the entry.
    pub refreshes_applied: u64,
    /// Refreshes dropped because a `set` won the race or the owner went away.
    pub refreshes_discarded: u64,
    /// Refresh reads that failed.
    pub fetch_failures: u64,
    /// Persistence writes issued by `set`.
    pub writes_started: u64,
    /// Persistence writes that failed.
    pub persist_failures: u64,
}

impl EntryStats {
    /// Share of `get` calls that never reached the store (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.fresh_reads + self.stale_reads + self.refreshes_started;
        if total == 0 {
            0.0
        } else {
            (self.fresh_reads + self.stale_reads) as f64 / total as f64
        }
    }
}
