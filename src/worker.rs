//! Per-worker cache handles.
//!
//! Under the buffered strategy a [`CacheWorker`] owns one touch buffer, so
//! recency is tracked per worker instead of per OS thread. This matters for
//! pools where a logical worker hops threads, or where one thread drives
//! several workers. Dropping the worker flushes its buffer.
//!
//! Under striping a worker is just a clone of the cache.
//!
//! ```
//! use globalru::config::GlobalLruBuilder;
//!
//! let cache = GlobalLruBuilder::new(1024)
//!     .concurrency_level(0)
//!     .try_build::<u32, String>()
//!     .unwrap();
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|id| {
//!         let worker = cache.worker();
//!         std::thread::spawn(move || {
//!             worker.put(id, format!("row {id}"), 16).unwrap();
//!             worker.get(&id).is_some()
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     assert!(handle.join().unwrap());
//! }
//! assert_eq!(cache.bytes_used(), 64);
//! ```

use std::hash::Hash;
use std::sync::Arc;

use crate::cache::{GlobalLruCache, Insertion};
use crate::error::CacheError;
use crate::recency::BufferHandle;

pub struct CacheWorker<K, V> {
    cache: GlobalLruCache<K, V>,
    buffer: Option<BufferHandle<K, V>>,
}

impl<K, V> CacheWorker<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(cache: GlobalLruCache<K, V>, buffer: Option<BufferHandle<K, V>>) -> Self {
        Self { cache, buffer }
    }

    pub fn cache(&self) -> &GlobalLruCache<K, V> {
        &self.cache
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.cache.get_in(self.buffer.as_ref(), key)
    }

    pub fn put(&self, key: K, value: V, size: u64) -> Result<Insertion<V>, CacheError> {
        self.cache
            .store(self.buffer.as_ref(), key, Arc::new(value), size)
    }

    pub fn put_with<E, F>(&self, key: K, value: V, size_of: F) -> Result<Insertion<V>, CacheError<E>>
    where
        F: FnOnce(&K, &V) -> Result<u64, E>,
    {
        self.cache
            .put_with_in(self.buffer.as_ref(), key, value, size_of)
    }

    pub fn get_or_load<E, F>(&self, key: K, loader: F) -> Result<Arc<V>, CacheError<E>>
    where
        F: FnOnce(&K) -> Result<(V, u64), E>,
    {
        self.cache
            .get_or_load_in(self.buffer.as_ref(), key, loader)
    }

    /// Same as [`GlobalLruCache::remove`]; removal never goes through a
    /// buffer.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.cache.remove(key)
    }

    /// Merges this worker's pending touches into the shared order.
    pub fn flush(&self) {
        if let Some(buffer) = &self.buffer {
            buffer.flush();
        }
    }

    /// Touches recorded by this worker and not yet merged.
    pub fn pending_touches(&self) -> usize {
        self.buffer.as_ref().map_or(0, BufferHandle::pending)
    }
}
