//! Lazy min-heap with stale entry skipping.
//!
//! Holds the shared recency order of the buffered strategy: keys are entry
//! ids, scores are touch sequences. A touch pushes a fresh heap entry and
//! leaves the old one behind; [`pop_best`](LazyMinHeap::pop_best) discards
//! entries whose score no longer matches the authoritative map.
//!
//! ```text
//!   scores: { 7 → 12, 3 → 15 }            (authoritative)
//!   heap:   (4, id 7)  ← stale, skipped
//!           (12, id 7) ← pop_best() returns (7, 12)
//!           (15, id 3)
//! ```
//!
//! | Operation      | Complexity         |
//! |----------------|--------------------|
//! | `update`       | O(log n)           |
//! | `remove`       | O(1)               |
//! | `pop_best`     | amortized O(log n) |
//! | `maybe_rebuild`| O(1) or O(n log n) |
//!
//! Not thread-safe; the buffered strategy keeps it behind a mutex.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::hash::Hash;

use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct LazyMinHeap<K, S> {
    scores: FxHashMap<K, S>,
    heap: BinaryHeap<Reverse<(S, K)>>,
}

impl<K, S> LazyMinHeap<K, S>
where
    K: Eq + Hash + Ord + Clone,
    S: Ord + Clone,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            scores: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Underlying heap length, including stale entries.
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    pub fn score_of(&self, key: &K) -> Option<&S> {
        self.scores.get(key)
    }

    /// Sets `key`'s score and returns the previous one.
    pub fn update(&mut self, key: K, score: S) -> Option<S> {
        let previous = self.scores.insert(key.clone(), score.clone());
        self.heap.push(Reverse((score, key)));
        previous
    }

    /// Removes `key` from the authoritative map; its heap entries go stale.
    pub fn remove(&mut self, key: &K) -> Option<S> {
        self.scores.remove(key)
    }

    /// Pops the minimum live `(key, score)`.
    pub fn pop_best(&mut self) -> Option<(K, S)> {
        loop {
            let Reverse((score, key)) = self.heap.pop()?;
            match self.scores.get(&key) {
                Some(live) if *live == score => {
                    self.scores.remove(&key);
                    return Some((key, score));
                },
                _ => continue,
            }
        }
    }

    /// Rebuilds the heap from the authoritative map, dropping stale entries.
    pub fn rebuild(&mut self) {
        self.heap = self
            .scores
            .iter()
            .map(|(key, score)| Reverse((score.clone(), key.clone())))
            .collect();
    }

    /// Rebuilds when `heap_len() > len() * factor`.
    pub fn maybe_rebuild(&mut self, factor: usize) {
        let factor = factor.max(1);
        if self.heap.len() > self.scores.len().saturating_mul(factor) {
            self.rebuild();
        }
    }

    pub fn clear(&mut self) {
        self.scores.clear();
        self.heap.clear();
    }
}

impl<K, S> Default for LazyMinHeap<K, S>
where
    K: Eq + Hash + Ord + Clone,
    S: Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
