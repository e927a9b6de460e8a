//! Resident cache entries.
//!
//! A [`CacheEntry`] is shared (`Arc`) between the record table, the recency
//! structures and any in-flight eviction pass. Its identity is its `id`: ids
//! are never reused, so a recency structure can tell an entry apart from a
//! later entry under the same key.
//!
//! ## Entry Structure
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────┐
//!   │                    CacheEntry<K, V>                      │
//!   ├──────────────────────────┬───────────────────────────────┤
//!   │  key: K                  │  immutable                    │
//!   │  id: u64                 │  recency handle, never reused │
//!   │  sequence: AtomicU64     │  last touch, cache-wide clock │
//!   │  detached: AtomicBool    │  set once, on table removal   │
//!   │  slot: RwLock<Slot<V>>   │  value: Arc<V> + size bytes   │
//!   └──────────────────────────┴───────────────────────────────┘
//! ```
//!
//! Size changes and detaching both take the `slot` write lock, so a replace
//! racing a removal either lands before it (and the removal releases the new
//! size) or observes `detached` and fails.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::budget::ByteBudget;

#[derive(Debug)]
struct Slot<V> {
    value: Arc<V>,
    size: u64,
}

/// One resident record.
pub struct CacheEntry<K, V> {
    key: K,
    id: u64,
    sequence: AtomicU64,
    detached: AtomicBool,
    slot: RwLock<Slot<V>>,
}

impl<K, V> CacheEntry<K, V> {
    pub(crate) fn new(key: K, id: u64, value: Arc<V>, size: u64) -> Self {
        Self {
            key,
            id,
            sequence: AtomicU64::new(0),
            detached: AtomicBool::new(false),
            slot: RwLock::new(Slot { value, size }),
        }
    }

    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Recency handle. Unique for the lifetime of the cache.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence of the most recent touch, `0` if never touched.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_sequence(&self, sequence: u64) {
        self.sequence.store(sequence, Ordering::Release);
    }

    #[inline]
    pub fn value(&self) -> Arc<V> {
        Arc::clone(&self.slot.read().value)
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.slot.read().size
    }

    /// `true` once the entry has left the record table.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Swaps in a new value and size, adjusting `budget` by the delta.
    ///
    /// Returns the previous value, or `None` if the entry was detached first;
    /// the caller must then go back through the table.
    pub(crate) fn replace(&self, value: Arc<V>, size: u64, budget: &ByteBudget) -> Option<Arc<V>> {
        let mut slot = self.slot.write();
        if self.is_detached() {
            return None;
        }
        if size > slot.size {
            budget.reserve(size - slot.size);
        } else {
            budget.release(slot.size - size);
        }
        slot.size = size;
        Some(std::mem::replace(&mut slot.value, value))
    }

    /// Marks the entry detached and releases its bytes.
    ///
    /// Must be called exactly once, by whoever removed it from the table.
    pub(crate) fn detach(&self, budget: &ByteBudget) -> u64 {
        let slot = self.slot.write();
        let was_detached = self.detached.swap(true, Ordering::AcqRel);
        assert!(!was_detached, "cache entry {} detached twice", self.id);
        budget.release(slot.size);
        slot.size
    }
}

impl<K, V> fmt::Debug for CacheEntry<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("sequence", &self.sequence())
            .field("size", &self.size())
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}
