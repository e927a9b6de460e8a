//! Striped recency: the order is split across fixed locked segments.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                        StripedRecency<K, V>                          │
//!   │                                                                      │
//!   │   key ──► ShardSelector ──► segment i                                │
//!   │                                                                      │
//!   │   segment 0: Mutex ┌──────────────────────────────────────────────┐  │
//!   │                    │ head (MRU) ─► [e9] ◄─► [e4] ◄─► [e2] ◄─ tail │  │
//!   │                    │ index: id → SlotId                           │  │
//!   │                    └──────────────────────────────────────────────┘  │
//!   │   segment 1: Mutex ┌──────────────────────────────────────────────┐  │
//!   │                    │ head (MRU) ─► [e7] ◄─► [e3]           ◄─ tail │  │
//!   │                    └──────────────────────────────────────────────┘  │
//!   │   ...                                                                │
//!   │   clock: AtomicU64 (cache-wide touch sequence)                       │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A touch takes only its segment's lock and draws its sequence while
//! holding it, so each segment list is sorted by sequence. Victim selection
//! walks the segments round-robin, peeks every tail, and pops the one with
//! the smallest sequence: a k-way merge of the segment tails. Touches that
//! race the scan can reorder entries across segments; within a segment the
//! order is always exact.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::ds::{IntrusiveList, ShardSelector, SlotId};
use crate::entry::CacheEntry;
use crate::error::InvariantError;
use crate::recency::RecencyTracker;

const SEGMENT_SEED: u64 = 0x7365_676d_656e_7401;

struct Segment<K, V> {
    list: IntrusiveList<Arc<CacheEntry<K, V>>>,
    index: FxHashMap<u64, SlotId>,
}

impl<K, V> Segment<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            list: IntrusiveList::with_capacity(capacity),
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    fn tail(&self) -> Option<(u64, u64)> {
        self.list.back().map(|entry| (entry.sequence(), entry.id()))
    }
}

pub struct StripedRecency<K, V> {
    segments: Box<[Mutex<Segment<K, V>>]>,
    selector: ShardSelector,
    clock: AtomicU64,
}

impl<K, V> StripedRecency<K, V>
where
    K: Hash,
{
    /// Creates `segments` segments (at least one), each pre-sized for
    /// `segment_capacity` entries.
    pub fn new(segments: usize, segment_capacity: usize) -> Self {
        let selector = ShardSelector::new(segments, SEGMENT_SEED);
        let segments = (0..selector.shard_count())
            .map(|_| Mutex::new(Segment::with_capacity(segment_capacity)))
            .collect();
        Self {
            segments,
            selector,
            clock: AtomicU64::new(1),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    fn segment_for(&self, entry: &CacheEntry<K, V>) -> &Mutex<Segment<K, V>> {
        &self.segments[self.selector.shard_for_key(entry.key())]
    }

    /// Index of the segment whose tail has the smallest sequence, scanning
    /// from `start`.
    fn least_recent_tail(&self, start: usize) -> Option<(usize, u64)> {
        let count = self.segments.len();
        let mut best: Option<(usize, u64, u64)> = None;
        for step in 0..count {
            let idx = (start + step) % count;
            let Some((sequence, id)) = self.segments[idx].lock().tail() else {
                continue;
            };
            if best.is_none_or(|(_, best_sequence, _)| sequence < best_sequence) {
                best = Some((idx, sequence, id));
            }
        }
        best.map(|(idx, _, id)| (idx, id))
    }
}

impl<K, V> RecencyTracker<K, V> for StripedRecency<K, V>
where
    K: Hash + Send + Sync,
    V: Send + Sync,
{
    fn on_touch(&self, entry: &Arc<CacheEntry<K, V>>) {
        let mut segment = self.segment_for(entry).lock();
        if entry.is_detached() {
            return;
        }
        entry.set_sequence(self.clock.fetch_add(1, Ordering::Relaxed));
        match segment.index.get(&entry.id()) {
            Some(&slot) => {
                segment.list.move_to_front(slot);
            },
            None => {
                let slot = segment.list.push_front(Arc::clone(entry));
                segment.index.insert(entry.id(), slot);
            },
        }
    }

    fn remove(&self, entry: &CacheEntry<K, V>) {
        let mut segment = self.segment_for(entry).lock();
        if let Some(slot) = segment.index.remove(&entry.id()) {
            segment.list.remove(slot);
        }
    }

    fn pop_victim(&self, cursor: &mut usize) -> Option<Arc<CacheEntry<K, V>>> {
        loop {
            let (idx, id) = self.least_recent_tail(*cursor)?;
            let mut segment = self.segments[idx].lock();
            // The tail may have been touched or removed since the scan.
            if segment.tail().map(|(_, tail_id)| tail_id) != Some(id) {
                continue;
            }
            let victim = segment.list.pop_back()?;
            segment.index.remove(&id);
            *cursor = (idx + 1) % self.segments.len();
            return Some(victim);
        }
    }

    fn len(&self) -> usize {
        self.segments.iter().map(|segment| segment.lock().list.len()).sum()
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        for (idx, segment) in self.segments.iter().enumerate() {
            let segment = segment.lock();
            #[cfg(debug_assertions)]
            segment.list.debug_validate_invariants();
            if segment.list.len() != segment.index.len() {
                return Err(InvariantError::new(format!(
                    "segment {idx}: list holds {} entries but index holds {}",
                    segment.list.len(),
                    segment.index.len()
                )));
            }
            let mut previous = u64::MAX;
            for entry in segment.list.iter() {
                if entry.is_detached() {
                    return Err(InvariantError::new(format!(
                        "segment {idx}: detached entry {} still linked",
                        entry.id()
                    )));
                }
                if !segment.index.contains_key(&entry.id()) {
                    return Err(InvariantError::new(format!(
                        "segment {idx}: entry {} has no index slot",
                        entry.id()
                    )));
                }
                if entry.sequence() >= previous {
                    return Err(InvariantError::new(format!(
                        "segment {idx}: sequence {} out of order after {previous}",
                        entry.sequence()
                    )));
                }
                previous = entry.sequence();
            }
        }
        Ok(())
    }
}
