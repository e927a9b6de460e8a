//! Sharded key → entry map.
//!
//! The [`RecordTable`] is the single source of truth for "is this key
//! cached". It also owns the byte accounting boundary: bytes are reserved
//! while the inserting shard lock is held and released when an entry is
//! detached under the removing shard lock, so `ByteBudget::used()` always
//! equals the sum of resident entry sizes at a quiescent point.
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────────────┐
//!   │                       RecordTable<K, V>                        │
//!   │                                                                │
//!   │   ShardSelector ──► shard index                                │
//!   │                                                                │
//!   │   ┌───────────────────┐ ┌───────────────────┐                  │
//!   │   │ RwLock<ShardState>│ │ RwLock<ShardState>│  ...             │
//!   │   │  K → Arc<Entry>   │ │  K → Arc<Entry>   │                  │
//!   │   │  K → Arc<Load>    │ │  K → Arc<Load>    │  (in flight)     │
//!   │   └───────────────────┘ └───────────────────┘                  │
//!   │                                                                │
//!   │   next_id: AtomicU64      len: AtomicUsize                     │
//!   │   budget: Arc<ByteBudget>                                      │
//!   └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Insert path
//!
//! `lookup_or_insert` tries a shared read lock first. On a miss it takes the
//! shard write lock, checks again, and files a `Load` marker for the key.
//! The supplier then runs with no lock held; later callers for the same key
//! find the marker and wait on it, callers for other keys are not blocked.
//! Once the supplier returns the entry is installed and the marker cleared,
//! so no two callers can both observe `was_inserted = true` for the same key.
//! A failing (or panicking) supplier clears its marker and leaves nothing
//! behind; a waiter then retries the insert itself.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::budget::ByteBudget;
use crate::ds::ShardSelector;
use crate::entry::CacheEntry;

const TABLE_SEED: u64 = 0x7461_626c_6500_0001;

struct ShardState<K, V> {
    entries: FxHashMap<K, Arc<CacheEntry<K, V>>>,
    loading: FxHashMap<K, Arc<Load>>,
}

type Shard<K, V> = RwLock<ShardState<K, V>>;

/// An insert in progress for one key.
#[derive(Default)]
struct Load {
    done: Mutex<bool>,
    ready: Condvar,
}

impl Load {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.ready.wait(&mut done);
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.ready.notify_all();
    }
}

/// The right to insert one key. Dropping it clears the marker and wakes
/// every waiter, whether or not the insert happened.
struct LoadClaim<'a, K, V>
where
    K: Eq + Hash,
{
    shard: &'a Shard<K, V>,
    key: K,
    load: Arc<Load>,
}

impl<K, V> Drop for LoadClaim<'_, K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        {
            let mut state = self.shard.write();
            if state
                .loading
                .get(&self.key)
                .is_some_and(|load| Arc::ptr_eq(load, &self.load))
            {
                state.loading.remove(&self.key);
            }
        }
        self.load.finish();
    }
}

pub struct RecordTable<K, V> {
    shards: Box<[Shard<K, V>]>,
    selector: ShardSelector,
    budget: Arc<ByteBudget>,
    next_id: AtomicU64,
    len: AtomicUsize,
}

impl<K, V> RecordTable<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(shards: usize, shard_capacity: usize, budget: Arc<ByteBudget>) -> Self {
        let selector = ShardSelector::new(shards, TABLE_SEED);
        let shards = (0..selector.shard_count())
            .map(|_| {
                RwLock::new(ShardState {
                    entries: FxHashMap::with_capacity_and_hasher(shard_capacity, Default::default()),
                    loading: FxHashMap::default(),
                })
            })
            .collect();
        Self {
            shards,
            selector,
            budget,
            next_id: AtomicU64::new(1),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &K) -> &Shard<K, V> {
        &self.shards[self.selector.shard_for_key(key)]
    }

    pub fn budget(&self) -> &ByteBudget {
        &self.budget
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.shard(key).read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.shard(key).read().entries.contains_key(key)
    }

    /// Returns the entry for `key`, creating it from `supplier` on a miss.
    ///
    /// The supplier runs at most once per insert, with no table lock held,
    /// and returns the value together with its size in bytes. Concurrent
    /// callers for the same key wait for it; a supplier must not insert its
    /// own key.
    pub fn lookup_or_insert<E, F>(
        &self,
        key: K,
        supplier: F,
    ) -> Result<(Arc<CacheEntry<K, V>>, bool), E>
    where
        F: FnOnce(&K) -> Result<(Arc<V>, u64), E>,
    {
        let shard = self.shard(&key);
        if let Some(entry) = shard.read().entries.get(&key) {
            return Ok((Arc::clone(entry), false));
        }

        let claim = loop {
            let pending = {
                let mut state = shard.write();
                if let Some(entry) = state.entries.get(&key) {
                    return Ok((Arc::clone(entry), false));
                }
                match state.loading.get(&key) {
                    Some(load) => Arc::clone(load),
                    None => {
                        let load = Arc::new(Load::default());
                        state.loading.insert(key.clone(), Arc::clone(&load));
                        break LoadClaim {
                            shard,
                            key: key.clone(),
                            load,
                        };
                    },
                }
            };
            pending.wait();
        };

        let (value, size) = supplier(&key)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(CacheEntry::new(key.clone(), id, value, size));
        {
            let mut state = shard.write();
            self.budget.reserve(size);
            state.entries.insert(key, Arc::clone(&entry));
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        drop(claim);
        Ok((entry, true))
    }

    /// Removes `key`, detaching its entry and releasing its bytes.
    pub fn remove(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        let mut state = self.shard(key).write();
        let entry = state.entries.remove(key)?;
        self.retire(&entry);
        Some(entry)
    }

    /// Removes `entry` only if its key still maps to that same entry.
    ///
    /// This is the claim an eviction pass makes on a victim; exactly one
    /// caller can win it.
    pub fn remove_entry(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
        let mut state = self.shard(entry.key()).write();
        let claimed = state
            .entries
            .get(entry.key())
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if claimed {
            state.entries.remove(entry.key());
            self.retire(entry);
        }
        claimed
    }

    /// Removes every entry, returning them detached.
    pub fn drain(&self) -> Vec<Arc<CacheEntry<K, V>>> {
        let mut drained = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let mut state = shard.write();
            for (_, entry) in state.entries.drain() {
                self.retire(&entry);
                drained.push(entry);
            }
        }
        drained
    }

    /// Visits every resident entry, one shard read lock at a time.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<CacheEntry<K, V>>)) {
        for shard in self.shards.iter() {
            for entry in shard.read().entries.values() {
                f(entry);
            }
        }
    }

    fn retire(&self, entry: &CacheEntry<K, V>) {
        entry.detach(&self.budget);
        self.len.fetch_sub(1, Ordering::AcqRel);
    }
}
