//! The global LRU cache facade.
//!
//! [`GlobalLruCache`] composes the record table, the byte budget, the
//! recency strategy and the eviction engine. It is a cheap `Clone` handle
//! over shared state; every clone sees the same entries.
//!
//! ## Put path
//!
//! ```text
//!   put(key, value, size)
//!     │
//!     ├─ Reject and size > maximum? ─► Err(BudgetExceeded), nothing changed
//!     │
//!     ├─ table.lookup_or_insert(key)       reserves `size` on insert
//!     │    hit  ─► entry.replace(value)     budget += new - old
//!     │    miss ─► new entry
//!     │
//!     ├─ over budget? ─► EvictionEngine::run (passes over this entry)
//!     │
//!     ├─ touch(entry)
//!     │
//!     └─ still over budget?
//!          Reject ─► remove entry, Err(BudgetExceeded)
//!          Admit  ─► Ok, shortfall in Insertion::eviction
//! ```
//!
//! ## Example
//!
//! ```
//! use globalru::cache::GlobalLruCache;
//! use globalru::config::GlobalLruConfig;
//!
//! let cache = GlobalLruCache::new(GlobalLruConfig::new(2)).unwrap();
//! cache.put("a", 1, 1).unwrap();
//! cache.put("b", 2, 1).unwrap();
//! cache.get(&"a");
//! cache.put("c", 3, 1).unwrap();
//!
//! assert!(cache.contains(&"a"));
//! assert!(!cache.contains(&"b"));
//! assert_eq!(cache.bytes_used(), 2);
//! ```

use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use crate::budget::ByteBudget;
use crate::config::{GlobalLruConfig, OverflowPolicy};
use crate::entry::CacheEntry;
use crate::error::{CacheError, ConfigError, InvariantError};
use crate::eviction::{EvictionEngine, EvictionListener, EvictionReport, NoopListener};
use crate::recency::{BufferHandle, Recency, RecencyTracker};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::table::RecordTable;
use crate::worker::CacheWorker;

/// Result of a successful put.
#[derive(Debug)]
pub struct Insertion<V> {
    /// The value replaced, if the key was already cached.
    pub previous: Option<Arc<V>>,
    /// The eviction pass this put triggered, if any.
    pub eviction: Option<EvictionReport>,
}

impl<V> Insertion<V> {
    pub fn is_update(&self) -> bool {
        self.previous.is_some()
    }

    /// `true` if the triggered pass could not reclaim its full target.
    pub fn is_short(&self) -> bool {
        self.eviction.is_some_and(|report| report.is_short())
    }
}

struct Inner<K, V> {
    config: GlobalLruConfig,
    table: RecordTable<K, V>,
    recency: Recency<K, V>,
    engine: EvictionEngine<K, V>,
    stats: CacheStats,
}

pub struct GlobalLruCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for GlobalLruCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> GlobalLruCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a cache that discards evicted values.
    pub fn new(config: GlobalLruConfig) -> Result<Self, ConfigError> {
        Self::with_listener(config, NoopListener)
    }

    /// Creates a cache that hands every policy eviction to `listener`.
    pub fn with_listener(
        config: GlobalLruConfig,
        listener: impl EvictionListener<K, V> + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let budget = Arc::new(ByteBudget::new(
            config.maximum_bytes_in_memory,
            config.min_cleared,
        ));
        let table = RecordTable::new(config.table_shards(), config.table_shard_capacity(), budget);
        let recency = Recency::from_config(&config);
        debug!(
            strategy = recency.name(),
            maximum_bytes = config.maximum_bytes_in_memory,
            min_cleared = config.min_cleared,
            table_shards = table.shard_count(),
            "global LRU cache created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                table,
                recency,
                engine: EvictionEngine::new(listener),
                stats: CacheStats::default(),
            }),
        })
    }

    /// Returns the value for `key` and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.get_in(None, key)
    }

    /// Returns the value for `key` without touching recency or stats.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.inner.table.get(key).map(|entry| entry.value())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.table.contains(key)
    }

    /// Inserts or replaces `key` with an entry of `size` bytes.
    ///
    /// Triggers a synchronous eviction pass if the budget is exceeded.
    pub fn put(&self, key: K, value: V, size: u64) -> Result<Insertion<V>, CacheError> {
        self.store(None, key, Arc::new(value), size)
    }

    /// Like [`put`](Self::put), sizing the entry with `size_of`.
    ///
    /// `size_of` runs exactly once; if it fails nothing changes and its
    /// error is returned as [`CacheError::Supplier`].
    pub fn put_with<E, F>(&self, key: K, value: V, size_of: F) -> Result<Insertion<V>, CacheError<E>>
    where
        F: FnOnce(&K, &V) -> Result<u64, E>,
    {
        self.put_with_in(None, key, value, size_of)
    }

    /// Returns the cached value, or loads, sizes and inserts it.
    ///
    /// Concurrent callers for the same key run `loader` at most once between
    /// them and wait for its result. No cache lock is held while it runs, so
    /// it may read or write other keys; it must not load `key` itself.
    pub fn get_or_load<E, F>(&self, key: K, loader: F) -> Result<Arc<V>, CacheError<E>>
    where
        F: FnOnce(&K) -> Result<(V, u64), E>,
    {
        self.get_or_load_in(None, key, loader)
    }

    /// Removes `key` without calling the eviction listener.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let entry = self.inner.table.remove(key)?;
        self.inner.recency.remove(&entry);
        self.inner.stats.add_removes(1);
        Some(entry.value())
    }

    /// Removes every entry without calling the eviction listener.
    pub fn clear(&self) {
        let drained = self.inner.table.drain();
        for entry in &drained {
            self.inner.recency.remove(entry);
        }
        self.inner.stats.add_removes(drained.len() as u64);
    }

    /// Resident entries.
    pub fn len(&self) -> usize {
        self.inner.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.table.is_empty()
    }

    pub fn bytes_used(&self) -> u64 {
        self.budget().used()
    }

    pub fn maximum_bytes(&self) -> u64 {
        self.budget().maximum()
    }

    pub fn config(&self) -> &GlobalLruConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Merges every pending buffered touch into the shared order. A no-op
    /// under striping.
    pub fn flush(&self) {
        self.inner.recency.flush();
    }

    /// A handle with its own touch buffer, for one worker of a pool.
    pub fn worker(&self) -> CacheWorker<K, V> {
        CacheWorker::new(self.clone(), self.inner.recency.register_worker())
    }

    /// Verifies accounting and recency ownership.
    ///
    /// Exact only at a quiescent point; flushes pending touches first.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        let inner = &self.inner;
        inner.recency.flush();

        let mut count = 0usize;
        let mut bytes = 0u64;
        let mut detached = None;
        inner.table.for_each(|entry| {
            count += 1;
            bytes += entry.size();
            if entry.is_detached() {
                detached.get_or_insert(entry.id());
            }
        });
        if let Some(id) = detached {
            return Err(InvariantError::new(format!(
                "table maps a detached entry {id}"
            )));
        }
        if count != inner.table.len() {
            return Err(InvariantError::new(format!(
                "table holds {count} entries but counts {}",
                inner.table.len()
            )));
        }
        if bytes != self.bytes_used() {
            return Err(InvariantError::new(format!(
                "resident entries sum to {bytes} bytes but the budget accounts {}",
                self.bytes_used()
            )));
        }
        if inner.recency.len() != count {
            return Err(InvariantError::new(format!(
                "{} recency handles for {count} resident entries",
                inner.recency.len()
            )));
        }
        inner.recency.check_invariants()
    }

    #[inline]
    fn budget(&self) -> &ByteBudget {
        self.inner.table.budget()
    }

    #[inline]
    fn touch(&self, buffer: Option<&BufferHandle<K, V>>, entry: &Arc<CacheEntry<K, V>>) {
        self.inner.recency.touch_with(buffer, entry);
    }

    pub(crate) fn get_in(&self, buffer: Option<&BufferHandle<K, V>>, key: &K) -> Option<Arc<V>> {
        match self.inner.table.get(key) {
            Some(entry) => {
                self.touch(buffer, &entry);
                self.inner.stats.inc_hit();
                Some(entry.value())
            },
            None => {
                self.inner.stats.inc_miss();
                None
            },
        }
    }

    pub(crate) fn put_with_in<E, F>(
        &self,
        buffer: Option<&BufferHandle<K, V>>,
        key: K,
        value: V,
        size_of: F,
    ) -> Result<Insertion<V>, CacheError<E>>
    where
        F: FnOnce(&K, &V) -> Result<u64, E>,
    {
        let size = size_of(&key, &value).map_err(CacheError::Supplier)?;
        self.store(buffer, key, Arc::new(value), size)
            .map_err(CacheError::widen)
    }

    pub(crate) fn store(
        &self,
        buffer: Option<&BufferHandle<K, V>>,
        key: K,
        value: Arc<V>,
        size: u64,
    ) -> Result<Insertion<V>, CacheError> {
        self.store_with(buffer, key, value, size, |_| {})
    }

    /// `store`, calling `before_replace` on an existing entry just before
    /// its value is swapped.
    fn store_with(
        &self,
        buffer: Option<&BufferHandle<K, V>>,
        key: K,
        value: Arc<V>,
        size: u64,
        mut before_replace: impl FnMut(&Arc<CacheEntry<K, V>>),
    ) -> Result<Insertion<V>, CacheError> {
        if self.never_fits(size) {
            self.inner.stats.inc_rejected_put();
            let err = self.budget_exceeded(size);
            debug!(error = %err, "oversized put rejected");
            return Err(err);
        }

        loop {
            let (entry, inserted) = match self
                .inner
                .table
                .lookup_or_insert(key.clone(), |_| Ok::<_, Infallible>((Arc::clone(&value), size)))
            {
                Ok(found) => found,
                Err(never) => match never {},
            };

            if inserted {
                self.inner.stats.inc_insert();
                let eviction = self.settle(buffer, &entry)?;
                return Ok(Insertion {
                    previous: None,
                    eviction,
                });
            }

            before_replace(&entry);
            // A concurrent removal detached the entry; go back to the table.
            let Some(previous) = entry.replace(Arc::clone(&value), size, self.budget()) else {
                continue;
            };
            self.inner.stats.inc_update();
            let eviction = self.settle(buffer, &entry)?;
            return Ok(Insertion {
                previous: Some(previous),
                eviction,
            });
        }
    }

    pub(crate) fn get_or_load_in<E, F>(
        &self,
        buffer: Option<&BufferHandle<K, V>>,
        key: K,
        loader: F,
    ) -> Result<Arc<V>, CacheError<E>>
    where
        F: FnOnce(&K) -> Result<(V, u64), E>,
    {
        let (entry, inserted) = self
            .inner
            .table
            .lookup_or_insert(key, |key| {
                loader(key).map(|(value, size)| (Arc::new(value), size))
            })
            .map_err(CacheError::Supplier)?;

        if !inserted {
            self.touch(buffer, &entry);
            self.inner.stats.inc_hit();
            return Ok(entry.value());
        }

        self.inner.stats.inc_miss();
        self.inner.stats.inc_insert();
        self.settle(buffer, &entry).map_err(CacheError::widen)?;
        Ok(entry.value())
    }

    /// Runs the eviction pass a write may owe, ranks the written entry, and
    /// applies the overflow policy.
    fn settle(
        &self,
        buffer: Option<&BufferHandle<K, V>>,
        entry: &Arc<CacheEntry<K, V>>,
    ) -> Result<Option<EvictionReport>, CacheError> {
        let inner = &self.inner;
        let owes_pass = self.budget().is_over_budget() && !self.never_fits(entry.size());
        let eviction = owes_pass.then(|| {
            let report = inner.engine.run(&inner.table, &inner.recency, Some(entry.as_ref()));
            inner.stats.record_pass(&report);
            report
        });
        self.touch(buffer, entry);

        if inner.config.overflow == OverflowPolicy::Reject && self.budget().is_over_budget() {
            if inner.table.remove_entry(entry) {
                inner.recency.remove(entry);
            }
            inner.stats.inc_rejected_put();
            let err = self.budget_exceeded(entry.size());
            debug!(entry = entry.id(), error = %err, "put rejected");
            return Err(err);
        }
        Ok(eviction)
    }

    /// Under `Reject`, an entry larger than the whole budget is refused
    /// without running a pass.
    #[inline]
    fn never_fits(&self, size: u64) -> bool {
        self.inner.config.overflow == OverflowPolicy::Reject && size > self.maximum_bytes()
    }

    fn budget_exceeded(&self, requested: u64) -> CacheError {
        CacheError::BudgetExceeded {
            requested,
            used: self.bytes_used(),
            maximum: self.maximum_bytes(),
        }
    }
}

impl<K, V> fmt::Debug for GlobalLruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let budget = self.inner.table.budget();
        f.debug_struct("GlobalLruCache")
            .field("len", &self.inner.table.len())
            .field("bytes_used", &budget.used())
            .field("maximum_bytes", &budget.maximum())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
