//! Cache-wide operation counters.
//!
//! Counters use `AtomicU64` with relaxed ordering. A [`CacheStatsSnapshot`]
//! read while operations are in flight may mix counts from before and after
//! any one operation; at a quiescent point it is exact.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::eviction::EvictionReport;

#[derive(Debug, Default)]
pub struct CacheStats {
    /// Successful lookups via `get()`/`get_or_load()`.
    hits: AtomicU64,
    /// Failed lookups.
    misses: AtomicU64,
    /// New key insertions.
    inserts: AtomicU64,
    /// Value replacements for existing keys.
    updates: AtomicU64,
    /// Explicit removals (including `clear()`).
    removes: AtomicU64,
    /// Entries removed by eviction passes.
    evictions: AtomicU64,
    evicted_bytes: AtomicU64,
    eviction_passes: AtomicU64,
    /// Passes that ran out of victims before reaching their target.
    shortfalls: AtomicU64,
    listener_failures: AtomicU64,
    /// Puts undone under `OverflowPolicy::Reject`.
    rejected_puts: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub updates: u64,
    pub removes: u64,
    pub evictions: u64,
    pub evicted_bytes: u64,
    pub eviction_passes: u64,
    pub shortfalls: u64,
    pub listener_failures: u64,
    pub rejected_puts: u64,
}

impl CacheStatsSnapshot {
    /// Hits over lookups, `0.0` before the first lookup.
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
            eviction_passes: self.eviction_passes.load(Ordering::Relaxed),
            shortfalls: self.shortfalls.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            rejected_puts: self.rejected_puts.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_removes(&self, count: u64) {
        self.removes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn inc_rejected_put(&self) {
        self.rejected_puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass(&self, report: &EvictionReport) {
        self.eviction_passes.fetch_add(1, Ordering::Relaxed);
        self.evictions.fetch_add(report.evicted, Ordering::Relaxed);
        self.evicted_bytes.fetch_add(report.reclaimed, Ordering::Relaxed);
        self.listener_failures
            .fetch_add(report.listener_failures, Ordering::Relaxed);
        if report.is_short() {
            self.shortfalls.fetch_add(1, Ordering::Relaxed);
        }
    }
}
