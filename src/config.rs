//! Cache configuration and builder.
//!
//! All options are fixed at construction. `concurrency_level` picks the
//! recency strategy once and for all:
//!
//! | `concurrency_level` | Strategy                                            |
//! |---------------------|-----------------------------------------------------|
//! | `0`                 | [`BufferedRecency`](crate::recency::BufferedRecency) |
//! | `n > 0`             | [`StripedRecency`](crate::recency::StripedRecency) with `n` segments |
//!
//! ## Example
//!
//! ```
//! use globalru::config::{GlobalLruBuilder, OverflowPolicy};
//!
//! let cache = GlobalLruBuilder::new(10 * 1024)
//!     .min_cleared(10 * 1024 / 4)
//!     .initial_cache_capacity(16)
//!     .load_factor(0.75)
//!     .concurrency_level(0)
//!     .thread_local_buffer_capacity(128)
//!     .overflow(OverflowPolicy::Reject)
//!     .try_build::<u64, Vec<u8>>()
//!     .unwrap();
//! assert!(cache.config().is_buffered());
//! ```

use std::hash::Hash;

use crate::cache::GlobalLruCache;
use crate::error::ConfigError;
use crate::eviction::{EvictionListener, NoopListener};

/// Table shard count used when `concurrency_level == 0`.
pub const DEFAULT_TABLE_SHARDS: usize = 16;

pub const DEFAULT_INITIAL_CACHE_CAPACITY: usize = 16;
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 16;
pub const DEFAULT_THREAD_LOCAL_BUFFER_CAPACITY: usize = 128;

/// Largest accepted `concurrency_level`; each level costs one recency
/// segment and one table shard up front.
pub const MAX_CONCURRENCY_LEVEL: usize = 1 << 16;

/// What a put does when an eviction pass cannot bring the cache back under
/// `maximum_bytes_in_memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Undo the insert and fail with
    /// [`CacheError::BudgetExceeded`](crate::error::CacheError::BudgetExceeded).
    Reject,
    /// Keep the entry over budget; the shortfall is reported in the put's
    /// [`EvictionReport`](crate::eviction::EvictionReport).
    #[default]
    Admit,
}

/// Validated cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalLruConfig {
    pub maximum_bytes_in_memory: u64,
    pub min_cleared: u64,
    /// Floor on the initial size of each recency segment (or of the shared
    /// buffered order). Does not affect eviction.
    pub minimum_cache_set_capacity: usize,
    pub initial_cache_capacity: usize,
    pub load_factor: f32,
    pub concurrency_level: usize,
    pub thread_local_buffer_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl GlobalLruConfig {
    pub fn new(maximum_bytes_in_memory: u64) -> Self {
        Self {
            maximum_bytes_in_memory,
            min_cleared: 0,
            minimum_cache_set_capacity: 0,
            initial_cache_capacity: DEFAULT_INITIAL_CACHE_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            thread_local_buffer_capacity: DEFAULT_THREAD_LOCAL_BUFFER_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maximum_bytes_in_memory == 0 {
            return Err(ConfigError::new("maximum_bytes_in_memory must be > 0"));
        }
        if self.min_cleared > self.maximum_bytes_in_memory {
            return Err(ConfigError::new(format!(
                "min_cleared ({}) must not exceed maximum_bytes_in_memory ({})",
                self.min_cleared, self.maximum_bytes_in_memory
            )));
        }
        if !self.load_factor.is_finite() || self.load_factor <= 0.0 || self.load_factor > 1.0 {
            return Err(ConfigError::new(format!(
                "load_factor must be in (0, 1], got {}",
                self.load_factor
            )));
        }
        if self.concurrency_level > MAX_CONCURRENCY_LEVEL {
            return Err(ConfigError::new(format!(
                "concurrency_level must be <= {MAX_CONCURRENCY_LEVEL}, got {}",
                self.concurrency_level
            )));
        }
        if self.is_buffered() && self.thread_local_buffer_capacity == 0 {
            return Err(ConfigError::new(
                "thread_local_buffer_capacity must be > 0 when concurrency_level is 0",
            ));
        }
        Ok(())
    }

    /// `true` when the thread-local buffered strategy is selected.
    #[inline]
    pub fn is_buffered(&self) -> bool {
        self.concurrency_level == 0
    }

    pub(crate) fn table_shards(&self) -> usize {
        if self.is_buffered() {
            DEFAULT_TABLE_SHARDS
        } else {
            self.concurrency_level
        }
    }

    /// Initial capacity of each table shard, sized so the configured load
    /// factor is not crossed before `initial_cache_capacity` entries.
    pub(crate) fn table_shard_capacity(&self) -> usize {
        let buckets = (self.initial_cache_capacity as f64 / f64::from(self.load_factor)).ceil();
        (buckets as usize).div_ceil(self.table_shards()).max(1)
    }

    pub(crate) fn segment_capacity(&self) -> usize {
        let shares = if self.is_buffered() {
            1
        } else {
            self.concurrency_level
        };
        (self.initial_cache_capacity / shares).max(self.minimum_cache_set_capacity)
    }
}

/// Builder for [`GlobalLruCache`].
#[derive(Debug, Clone)]
pub struct GlobalLruBuilder {
    config: GlobalLruConfig,
}

impl GlobalLruBuilder {
    /// Starts from defaults with the given byte ceiling.
    pub fn new(maximum_bytes_in_memory: u64) -> Self {
        Self {
            config: GlobalLruConfig::new(maximum_bytes_in_memory),
        }
    }

    pub fn min_cleared(mut self, bytes: u64) -> Self {
        self.config.min_cleared = bytes;
        self
    }

    pub fn minimum_cache_set_capacity(mut self, capacity: usize) -> Self {
        self.config.minimum_cache_set_capacity = capacity;
        self
    }

    pub fn initial_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_cache_capacity = capacity;
        self
    }

    pub fn load_factor(mut self, load_factor: f32) -> Self {
        self.config.load_factor = load_factor;
        self
    }

    /// `0` selects thread-local buffering; `n > 0` selects `n` striped
    /// segments.
    pub fn concurrency_level(mut self, level: usize) -> Self {
        self.config.concurrency_level = level;
        self
    }

    pub fn thread_local_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.thread_local_buffer_capacity = capacity;
        self
    }

    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow = policy;
        self
    }

    /// Validates and returns the configuration.
    pub fn config(self) -> Result<GlobalLruConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Builds a cache that discards evicted values.
    pub fn try_build<K, V>(self) -> Result<GlobalLruCache<K, V>, ConfigError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.try_build_with_listener(NoopListener)
    }

    /// Builds a cache that hands every policy eviction to `listener`.
    pub fn try_build_with_listener<K, V, L>(
        self,
        listener: L,
    ) -> Result<GlobalLruCache<K, V>, ConfigError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
        L: EvictionListener<K, V> + 'static,
    {
        GlobalLruCache::with_listener(self.config()?, listener)
    }
}
