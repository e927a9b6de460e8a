//! Byte-budgeted eviction passes.
//!
//! A pass runs synchronously inside the `put` that pushed the budget over
//! its ceiling:
//!
//! ```text
//!   target = max(min_cleared, bytes_over_budget)
//!
//!   victims = recency.select_victims()        (flushes buffered touches)
//!   while reclaimed < target:
//!       victim = victims.next()  or stop      (shortfall)
//!       skip the entry being written
//!       table.remove_entry(victim)            claim; a loser skips it
//!       listener.on_evict(key, value)         errors logged, pass continues
//!       recency.remove(victim)                drops any touch that raced in
//!       reclaimed += victim.size
//! ```
//!
//! The claim comes before the listener so that concurrent passes can never
//! both hand the same entry to the listener. Once claimed the entry is
//! detached, so lookups miss it and its bytes are already released.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::entry::CacheEntry;
use crate::error::ListenerError;
use crate::recency::RecencyTracker;
use crate::table::RecordTable;

/// Receives every entry removed by an eviction pass.
///
/// Explicit `remove` and `clear` do not call the listener. It runs on the
/// thread whose `put` triggered the pass, with no cache locks held, and must
/// not call back into the cache for the same key.
///
/// Closures of the right shape are listeners:
///
/// ```
/// use std::sync::Arc;
/// use globalru::error::ListenerError;
/// use globalru::eviction::EvictionListener;
///
/// let listener = |key: &u64, value: &Arc<String>| -> Result<(), ListenerError> {
///     println!("write back {key} = {value}");
///     Ok(())
/// };
/// listener.on_evict(&1, &Arc::new("a".into())).unwrap();
/// ```
pub trait EvictionListener<K, V>: Send + Sync {
    fn on_evict(&self, key: &K, value: &Arc<V>) -> Result<(), ListenerError>;
}

impl<K, V, F> EvictionListener<K, V> for F
where
    F: Fn(&K, &Arc<V>) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_evict(&self, key: &K, value: &Arc<V>) -> Result<(), ListenerError> {
        self(key, value)
    }
}

/// Listener that drops evicted values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl<K, V> EvictionListener<K, V> for NoopListener {
    fn on_evict(&self, _key: &K, _value: &Arc<V>) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Bytes the pass set out to reclaim.
    pub target: u64,
    pub reclaimed: u64,
    /// Entries removed.
    pub evicted: u64,
    /// Evicted entries whose listener call failed. They are gone regardless.
    pub listener_failures: u64,
}

impl EvictionReport {
    /// Bytes still missing when the pass ran out of victims.
    pub fn shortfall(&self) -> u64 {
        self.target.saturating_sub(self.reclaimed)
    }

    pub fn is_short(&self) -> bool {
        self.reclaimed < self.target
    }
}

pub struct EvictionEngine<K, V> {
    listener: Box<dyn EvictionListener<K, V>>,
}

impl<K, V> EvictionEngine<K, V>
where
    K: Eq + std::hash::Hash + Clone,
{
    pub fn new(listener: impl EvictionListener<K, V> + 'static) -> Self {
        Self {
            listener: Box::new(listener),
        }
    }

    /// Runs one pass against the table's current budget.
    ///
    /// `protected` is the entry whose write triggered the pass. If it comes
    /// up as a victim it is passed over and left unranked; the caller ranks
    /// it again once the pass is done.
    pub fn run<R>(
        &self,
        table: &RecordTable<K, V>,
        recency: &R,
        protected: Option<&CacheEntry<K, V>>,
    ) -> EvictionReport
    where
        R: RecencyTracker<K, V> + ?Sized,
    {
        let target = table.budget().eviction_target();
        let mut report = EvictionReport {
            target,
            ..EvictionReport::default()
        };

        let mut victims = recency.select_victims();
        while report.reclaimed < target {
            let Some(victim) = victims.next() else {
                break;
            };
            if protected.is_some_and(|entry| entry.id() == victim.id()) {
                continue;
            }
            if !table.remove_entry(&victim) {
                // Removed or evicted by someone else since it was ranked.
                recency.remove(&victim);
                continue;
            }
            self.notify(&victim, &mut report);
            recency.remove(&victim);
            report.reclaimed = report.reclaimed.saturating_add(victim.size());
            report.evicted += 1;
        }

        if report.is_short() {
            warn!(
                target_bytes = report.target,
                reclaimed = report.reclaimed,
                evicted = report.evicted,
                used = table.budget().used(),
                "eviction pass ran out of victims"
            );
        } else {
            debug!(
                target_bytes = report.target,
                reclaimed = report.reclaimed,
                evicted = report.evicted,
                "eviction pass complete"
            );
        }
        report
    }

    fn notify(&self, victim: &CacheEntry<K, V>, report: &mut EvictionReport) {
        if let Err(err) = self.listener.on_evict(victim.key(), &victim.value()) {
            report.listener_failures += 1;
            warn!(
                entry = victim.id(),
                size = victim.size(),
                error = %err,
                "eviction listener failed; entry evicted anyway"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::budget::ByteBudget;
    use crate::recency::StripedRecency;

    struct Fixture {
        table: RecordTable<u64, u64>,
        recency: StripedRecency<u64, u64>,
    }

    impl Fixture {
        fn new(max: u64, min_cleared: u64) -> Self {
            Self {
                table: RecordTable::new(4, 4, Arc::new(ByteBudget::new(max, min_cleared))),
                recency: StripedRecency::new(1, 4),
            }
        }

        fn insert(&self, key: u64, size: u64) {
            let (entry, _) = self
                .table
                .lookup_or_insert(key, |_| Ok::<_, Infallible>((Arc::new(key), size)))
                .unwrap();
            self.recency.on_touch(&entry);
        }
    }

    #[test]
    fn pass_reclaims_least_recent_until_target() {
        let fx = Fixture::new(10, 0);
        for key in 0..6 {
            fx.insert(key, 2);
        }
        assert_eq!(fx.table.budget().used(), 12);

        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&evicted);
        let engine = EvictionEngine::new(move |key: &u64, _: &Arc<u64>| -> Result<(), ListenerError> {
            log.lock().push(*key);
            Ok(())
        });

        let report = engine.run(&fx.table, &fx.recency, None);
        assert_eq!(report.target, 2);
        assert_eq!(report.reclaimed, 2);
        assert_eq!(report.evicted, 1);
        assert!(!report.is_short());
        assert_eq!(*evicted.lock(), [0]);
        assert_eq!(fx.table.budget().used(), 10);
        assert!(!fx.table.contains(&0));
    }

    #[test]
    fn min_cleared_widens_the_target() {
        let fx = Fixture::new(10, 5);
        for key in 0..6 {
            fx.insert(key, 2);
        }
        let report = EvictionEngine::new(NoopListener).run(&fx.table, &fx.recency, None);
        assert_eq!(report.target, 7);
        assert_eq!(report.evicted, 4);
        assert_eq!(report.reclaimed, 8);
        assert_eq!(fx.table.len(), 2);
    }

    #[test]
    fn exhausted_victims_report_shortfall() {
        let fx = Fixture::new(10, 0);
        fx.insert(1, 4);
        fx.insert(2, 4);
        // Resident in the table but never touched, so not evictable.
        fx.table
            .lookup_or_insert(3, |_| Ok::<_, Infallible>((Arc::new(3), 20)))
            .unwrap();

        let report = EvictionEngine::new(NoopListener).run(&fx.table, &fx.recency, None);
        assert_eq!(report.target, 18);
        assert_eq!(report.reclaimed, 8);
        assert!(report.is_short());
        assert_eq!(report.shortfall(), 10);
        assert_eq!(fx.table.budget().used(), 20);
    }

    #[test]
    fn listener_failure_does_not_stop_the_pass() {
        let fx = Fixture::new(4, 0);
        for key in 0..4 {
            fx.insert(key, 2);
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let engine = EvictionEngine::new(move |key: &u64, _: &Arc<u64>| -> Result<(), ListenerError> {
            counter.fetch_add(1, Ordering::SeqCst);
            if *key == 0 {
                Err("disk full".into())
            } else {
                Ok(())
            }
        });

        let report = engine.run(&fx.table, &fx.recency, None);
        assert_eq!(report.evicted, 2);
        assert_eq!(report.listener_failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!fx.table.contains(&0));
        assert!(!fx.table.contains(&1));
    }

    #[test]
    fn victims_removed_elsewhere_are_skipped() {
        let fx = Fixture::new(4, 0);
        for key in 0..3 {
            fx.insert(key, 2);
        }
        // Explicit removal detaches key 0 but leaves it ranked.
        let removed = fx.table.remove(&0).unwrap();
        assert!(removed.is_detached());
        fx.insert(3, 2);

        let report = EvictionEngine::new(NoopListener).run(&fx.table, &fx.recency, None);
        assert_eq!(report.evicted, 1);
        assert!(!fx.table.contains(&1));
        assert!(fx.recency.check_invariants().is_ok());
    }

    #[test]
    fn protected_entry_is_passed_over() {
        let fx = Fixture::new(4, 0);
        fx.insert(0, 2);
        fx.insert(1, 2);
        fx.insert(2, 2);
        let written = fx.table.get(&0).unwrap();

        let report = EvictionEngine::new(NoopListener).run(&fx.table, &fx.recency, Some(&*written));
        assert_eq!(report.evicted, 1);
        assert!(fx.table.contains(&0));
        assert!(!fx.table.contains(&1));
        // Popped but not evicted: the writer ranks it again.
        assert_eq!(fx.recency.len(), 1);
    }
}
