//! Recency tracking strategies.
//!
//! The cache orders entries by their last touch. Two strategies implement
//! the same [`RecencyTracker`] capability set, and [`Recency`] closes over
//! them; the variant is picked once from the configuration and never changes.
//!
//! | Strategy            | Touch cost                   | Victim order                        |
//! |---------------------|------------------------------|-------------------------------------|
//! | [`StripedRecency`]  | one segment lock             | exact per segment, merged by sequence |
//! | [`BufferedRecency`] | no shared lock (buffered)    | exact after the forced flush        |
//!
//! ## Ownership of recency handles
//!
//! An entry's id is its recency handle. It is held by at most one recency
//! structure: the segment its key hashes to (striped) or the shared order
//! (buffered). Touches sitting in a worker's buffer are pending records, not
//! claims; a flush drops any that refer to detached entries or carry an
//! older sequence than the one already applied.
//!
//! Every touch checks `is_detached()` under the lock of the structure it
//! mutates, and removal detaches before taking that lock, so a touch racing
//! a removal can never leave an orphaned node behind.

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::GlobalLruConfig;
use crate::entry::CacheEntry;
use crate::error::InvariantError;

pub mod buffered;
pub mod striped;

pub use buffered::{BufferHandle, BufferedRecency};
pub use striped::StripedRecency;

/// Capability set shared by both strategies.
pub trait RecencyTracker<K, V>: Send + Sync {
    /// Records an access to `entry`, making it the most recent.
    fn on_touch(&self, entry: &Arc<CacheEntry<K, V>>);

    /// Drops `entry` from the recency structure, if present.
    fn remove(&self, entry: &CacheEntry<K, V>);

    /// Makes every pending touch visible in the victim order.
    fn flush(&self) {}

    /// Removes and returns the least-recent entry, or `None` when empty.
    ///
    /// `cursor` carries scan state between calls of one selection.
    fn pop_victim(&self, cursor: &mut usize) -> Option<Arc<CacheEntry<K, V>>>;

    /// Entries currently claimed by the recency structure.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_invariants(&self) -> Result<(), InvariantError>;

    /// Flushes pending touches, then yields victims least-recent first.
    ///
    /// The sequence is lazy: each `next()` removes one entry from the
    /// recency structure, so callers stop pulling once they have enough.
    fn select_victims(&self) -> Victims<'_, K, V, Self> {
        self.flush();
        Victims {
            tracker: self,
            cursor: 0,
            _marker: PhantomData,
        }
    }
}

/// Lazy victim sequence returned by [`RecencyTracker::select_victims`].
pub struct Victims<'a, K, V, T: ?Sized> {
    tracker: &'a T,
    cursor: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, T> Iterator for Victims<'_, K, V, T>
where
    T: RecencyTracker<K, V> + ?Sized,
{
    type Item = Arc<CacheEntry<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.tracker.pop_victim(&mut self.cursor)
    }
}

/// The strategy chosen at construction.
pub enum Recency<K, V> {
    Striped(StripedRecency<K, V>),
    Buffered(BufferedRecency<K, V>),
}

impl<K, V> Recency<K, V>
where
    K: Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn from_config(config: &GlobalLruConfig) -> Self {
        if config.is_buffered() {
            Recency::Buffered(BufferedRecency::new(
                config.thread_local_buffer_capacity,
                config.segment_capacity(),
            ))
        } else {
            Recency::Striped(StripedRecency::new(
                config.concurrency_level,
                config.segment_capacity(),
            ))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Recency::Striped(_) => "striped",
            Recency::Buffered(_) => "buffered",
        }
    }

    /// A dedicated touch buffer for one worker; `None` under striping, where
    /// touches go straight to a segment.
    pub fn register_worker(&self) -> Option<BufferHandle<K, V>> {
        match self {
            Recency::Striped(_) => None,
            Recency::Buffered(buffered) => Some(buffered.register()),
        }
    }

    /// Touches through a worker's own buffer when it has one.
    pub fn touch_with(&self, buffer: Option<&BufferHandle<K, V>>, entry: &Arc<CacheEntry<K, V>>) {
        match (self, buffer) {
            (Recency::Buffered(_), Some(buffer)) => buffer.record(entry),
            _ => self.on_touch(entry),
        }
    }
}

impl<K, V> RecencyTracker<K, V> for Recency<K, V>
where
    K: Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn on_touch(&self, entry: &Arc<CacheEntry<K, V>>) {
        match self {
            Recency::Striped(striped) => striped.on_touch(entry),
            Recency::Buffered(buffered) => buffered.on_touch(entry),
        }
    }

    fn remove(&self, entry: &CacheEntry<K, V>) {
        match self {
            Recency::Striped(striped) => striped.remove(entry),
            Recency::Buffered(buffered) => buffered.remove(entry),
        }
    }

    fn flush(&self) {
        match self {
            Recency::Striped(striped) => striped.flush(),
            Recency::Buffered(buffered) => buffered.flush(),
        }
    }

    fn pop_victim(&self, cursor: &mut usize) -> Option<Arc<CacheEntry<K, V>>> {
        match self {
            Recency::Striped(striped) => striped.pop_victim(cursor),
            Recency::Buffered(buffered) => buffered.pop_victim(cursor),
        }
    }

    fn len(&self) -> usize {
        match self {
            Recency::Striped(striped) => striped.len(),
            Recency::Buffered(buffered) => buffered.len(),
        }
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        match self {
            Recency::Striped(striped) => striped.check_invariants(),
            Recency::Buffered(buffered) => buffered.check_invariants(),
        }
    }
}
