//! Deterministic key-to-shard mapping.
//!
//! Used by the [`RecordTable`](crate::table::RecordTable) to pick a map shard
//! and by [`StripedRecency`](crate::recency::StripedRecency) to pick a
//! recency segment. The two use different seeds so that a hot table shard
//! does not also mean a hot segment.
//!
//! ```text
//!   key ──► hash(seed, key) % shards ──► ┌─────────┬─────────┬─────────┐
//!                                        │ shard 0 │ shard 1 │ shard 2 │
//!                                        └─────────┴─────────┴─────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```
//! use globalru::ds::ShardSelector;
//!
//! let selector = ShardSelector::new(4, 0);
//! let shard = selector.shard_for_key(&"record:17");
//! assert!(shard < 4);
//! assert_eq!(selector.shard_for_key(&"record:17"), shard);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Seeded hash selector over `[0, shards)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSelector {
    shards: usize,
    seed: u64,
}

impl ShardSelector {
    /// Creates a selector for `shards` shards; the count is clamped to at
    /// least 1.
    pub fn new(shards: usize, seed: u64) -> Self {
        Self {
            shards: shards.max(1),
            seed,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards
    }

    /// Maps a key to its shard. Deterministic for a given selector.
    #[inline]
    pub fn shard_for_key<K: Hash + ?Sized>(&self, key: &K) -> usize {
        if self.shards == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards
    }
}

impl Default for ShardSelector {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_deterministic_and_in_range() {
        let selector = ShardSelector::new(8, 123);
        for key in 0..1_000u64 {
            let shard = selector.shard_for_key(&key);
            assert!(shard < 8);
            assert_eq!(selector.shard_for_key(&key), shard);
        }
    }

    #[test]
    fn zero_shards_clamps_to_one() {
        let selector = ShardSelector::new(0, 9);
        assert_eq!(selector.shard_count(), 1);
        assert_eq!(selector.shard_for_key(&"anything"), 0);
    }

    #[test]
    fn keys_spread_over_every_shard() {
        let selector = ShardSelector::new(4, 0);
        let mut seen = [0usize; 4];
        for key in 0..4_000u64 {
            seen[selector.shard_for_key(&key)] += 1;
        }
        assert!(seen.iter().all(|&count| count > 500), "{seen:?}");
    }
}
