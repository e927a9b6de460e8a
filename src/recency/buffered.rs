//! Buffered recency: workers record touches locally and merge them into one
//! shared order in batches.
//!
//! ## Architecture
//!
//! ```text
//!   worker A                worker B
//!   ┌──────────────┐        ┌──────────────┐
//!   │ TouchBuffer  │        │ TouchBuffer  │   (e, seq) in program order,
//!   │ [(e3,41),..] │        │ [(e8,40),..] │   at most `capacity` pending
//!   └──────┬───────┘        └──────┬───────┘
//!          │ flush (full, explicit, │
//!          │ worker exit, eviction) │
//!          ▼                        ▼
//!   ┌──────────────────────────────────────────────────┐
//!   │ Mutex<OrderState>                                │
//!   │   heap:    LazyMinHeap<id, seq>   (victim order) │
//!   │   entries: id → Arc<CacheEntry>   (owner table)  │
//!   └──────────────────────────────────────────────────┘
//! ```
//!
//! Sequences are drawn from one cache-wide clock when the touch is recorded,
//! so once every buffer has been flushed the heap holds the exact global
//! touch order. Victim selection flushes every registered buffer first.
//!
//! Buffers are keyed by worker handle rather than by OS thread:
//! [`BufferedRecency::register`] hands out a [`BufferHandle`] that a worker
//! carries around. Calls that arrive without one go through a per-thread
//! default handle created on first touch and flushed when the thread exits.
//! A default handle parked for an order that has since been dropped is
//! released on the dropping thread at once, and on every other thread the
//! next time it parks a new handle.
//!
//! A flush applies a touch only if the entry is still attached and the
//! touch is newer than the sequence already in the heap.

use std::any::Any;
use std::cell::RefCell;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::ds::LazyMinHeap;
use crate::entry::CacheEntry;
use crate::error::InvariantError;
use crate::recency::RecencyTracker;

/// Heap rebuild threshold: stale heap entries may reach this multiple of
/// live ones before compaction.
const REBUILD_FACTOR: usize = 4;

static NEXT_ORDER_ID: AtomicU64 = AtomicU64::new(1);

/// A thread's default [`BufferHandle`] for one order, type-erased.
struct ParkedHandle {
    closed: Arc<AtomicBool>,
    handle: Box<dyn Any>,
}

thread_local! {
    static DEFAULT_HANDLES: RefCell<FxHashMap<u64, ParkedHandle>> =
        RefCell::new(FxHashMap::default());
}

type Touch<K, V> = (Arc<CacheEntry<K, V>>, u64);

struct TouchBuffer<K, V> {
    touches: Vec<Touch<K, V>>,
}

struct OrderState<K, V> {
    heap: LazyMinHeap<u64, u64>,
    entries: FxHashMap<u64, Arc<CacheEntry<K, V>>>,
}

impl<K, V> OrderState<K, V> {
    fn apply(&mut self, touches: Vec<Touch<K, V>>) -> usize {
        let mut applied = 0;
        for (entry, sequence) in touches {
            if entry.is_detached() {
                continue;
            }
            let id = entry.id();
            if self.heap.score_of(&id).is_some_and(|&current| current >= sequence) {
                continue;
            }
            self.heap.update(id, sequence);
            entry.set_sequence(sequence);
            self.entries.insert(id, entry);
            applied += 1;
        }
        self.heap.maybe_rebuild(REBUILD_FACTOR);
        applied
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.entries.clear();
    }
}

struct SharedOrder<K, V> {
    order_id: u64,
    buffer_capacity: usize,
    clock: AtomicU64,
    closed: Arc<AtomicBool>,
    state: Mutex<OrderState<K, V>>,
    buffers: Mutex<Vec<Weak<Mutex<TouchBuffer<K, V>>>>>,
}

impl<K, V> SharedOrder<K, V> {
    #[inline]
    fn next_sequence(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn apply(&self, touches: Vec<Touch<K, V>>) {
        if touches.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let pending = touches.len();
        let applied = state.apply(touches);
        trace!(order = self.order_id, pending, applied, "flushed touch buffer");
    }

    fn flush_buffer(&self, buffer: &Mutex<TouchBuffer<K, V>>) {
        let touches = mem::take(&mut buffer.lock().touches);
        self.apply(touches);
    }

    fn live_buffers(&self) -> Vec<Arc<Mutex<TouchBuffer<K, V>>>> {
        let mut registry = self.buffers.lock();
        let mut live = Vec::with_capacity(registry.len());
        registry.retain(|weak| match weak.upgrade() {
            Some(buffer) => {
                live.push(buffer);
                true
            },
            None => false,
        });
        live
    }

    fn flush_all(&self) {
        for buffer in self.live_buffers() {
            self.flush_buffer(&buffer);
        }
    }
}

/// One worker's touch buffer.
///
/// Pending touches are merged into the shared order when the buffer fills,
/// on [`flush`](Self::flush), before any victim selection, and when the
/// handle is dropped.
pub struct BufferHandle<K, V> {
    shared: Arc<SharedOrder<K, V>>,
    buffer: Arc<Mutex<TouchBuffer<K, V>>>,
}

impl<K, V> BufferHandle<K, V> {
    /// Records a touch of `entry`; flushes if the buffer is now full.
    pub fn record(&self, entry: &Arc<CacheEntry<K, V>>) {
        let full = {
            let mut buffer = self.buffer.lock();
            buffer
                .touches
                .push((Arc::clone(entry), self.shared.next_sequence()));
            buffer.touches.len() >= self.shared.buffer_capacity
        };
        if full {
            self.flush();
        }
    }

    pub fn flush(&self) {
        self.shared.flush_buffer(&self.buffer);
    }

    /// Touches recorded but not yet merged.
    pub fn pending(&self) -> usize {
        self.buffer.lock().touches.len()
    }
}

impl<K, V> Drop for BufferHandle<K, V> {
    fn drop(&mut self) {
        self.flush();
    }
}

pub struct BufferedRecency<K, V> {
    shared: Arc<SharedOrder<K, V>>,
}

impl<K, V> BufferedRecency<K, V> {
    /// Creates an empty order; every buffer flushes after
    /// `buffer_capacity` touches.
    pub fn new(buffer_capacity: usize, initial_capacity: usize) -> Self {
        let state = OrderState {
            heap: LazyMinHeap::with_capacity(initial_capacity),
            entries: FxHashMap::with_capacity_and_hasher(initial_capacity, Default::default()),
        };
        Self {
            shared: Arc::new(SharedOrder {
                order_id: NEXT_ORDER_ID.fetch_add(1, Ordering::Relaxed),
                buffer_capacity: buffer_capacity.max(1),
                clock: AtomicU64::new(1),
                closed: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(state),
                buffers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.shared.buffer_capacity
    }

    /// Registers a new worker buffer.
    pub fn register(&self) -> BufferHandle<K, V> {
        let buffer = Arc::new(Mutex::new(TouchBuffer {
            touches: Vec::with_capacity(self.shared.buffer_capacity),
        }));
        self.shared.buffers.lock().push(Arc::downgrade(&buffer));
        BufferHandle {
            shared: Arc::clone(&self.shared),
            buffer,
        }
    }

    /// Workers with a live buffer.
    pub fn registered_buffers(&self) -> usize {
        self.shared.live_buffers().len()
    }
}

impl<K, V> BufferedRecency<K, V>
where
    K: 'static,
    V: 'static,
{
    /// Records through this thread's default handle, creating it on first
    /// use. Falls back to applying directly when the thread-local is being
    /// torn down or is already borrowed.
    fn record_on_thread(&self, entry: &Arc<CacheEntry<K, V>>) {
        let recorded = DEFAULT_HANDLES
            .try_with(|handles| {
                let Ok(mut handles) = handles.try_borrow_mut() else {
                    return false;
                };
                let order_id = self.shared.order_id;
                if !handles.contains_key(&order_id) {
                    handles.retain(|_, parked| !parked.closed.load(Ordering::Acquire));
                    handles.insert(order_id, ParkedHandle {
                        closed: Arc::clone(&self.shared.closed),
                        handle: Box::new(self.register()),
                    });
                }
                let handle = handles
                    .get(&order_id)
                    .and_then(|parked| parked.handle.downcast_ref::<BufferHandle<K, V>>());
                match handle {
                    Some(handle) => {
                        handle.record(entry);
                        true
                    },
                    None => false,
                }
            })
            .unwrap_or(false);
        if !recorded {
            let sequence = self.shared.next_sequence();
            self.shared.apply(vec![(Arc::clone(entry), sequence)]);
        }
    }
}

impl<K, V> RecencyTracker<K, V> for BufferedRecency<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn on_touch(&self, entry: &Arc<CacheEntry<K, V>>) {
        self.record_on_thread(entry);
    }

    fn remove(&self, entry: &CacheEntry<K, V>) {
        let mut state = self.shared.state.lock();
        state.heap.remove(&entry.id());
        state.entries.remove(&entry.id());
    }

    fn flush(&self) {
        self.shared.flush_all();
    }

    fn pop_victim(&self, _cursor: &mut usize) -> Option<Arc<CacheEntry<K, V>>> {
        let mut state = self.shared.state.lock();
        let (id, _) = state.heap.pop_best()?;
        match state.entries.remove(&id) {
            Some(entry) => Some(entry),
            None => panic!("recency handle {id} has no owning entry"),
        }
    }

    fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let state = self.shared.state.lock();
        if state.heap.len() != state.entries.len() {
            return Err(InvariantError::new(format!(
                "shared order ranks {} ids but owns {} entries",
                state.heap.len(),
                state.entries.len()
            )));
        }
        for (&id, entry) in &state.entries {
            if entry.id() != id {
                return Err(InvariantError::new(format!(
                    "entry {} filed under id {id}",
                    entry.id()
                )));
            }
            if entry.is_detached() {
                return Err(InvariantError::new(format!(
                    "detached entry {id} still ranked"
                )));
            }
            if state.heap.score_of(&id) != Some(&entry.sequence()) {
                return Err(InvariantError::new(format!(
                    "entry {id} ranked at {:?} but last touched at {}",
                    state.heap.score_of(&id),
                    entry.sequence()
                )));
            }
        }
        Ok(())
    }
}

impl<K, V> Drop for BufferedRecency<K, V> {
    fn drop(&mut self) {
        // Default handles parked in thread-locals outlive the order; leave
        // them nothing to hold on to.
        {
            let mut state = self.shared.state.lock();
            self.shared.closed.store(true, Ordering::Release);
            state.clear();
        }
        for buffer in self.shared.live_buffers() {
            buffer.lock().touches.clear();
        }
        let parked = DEFAULT_HANDLES
            .try_with(|handles| {
                handles
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut handles| handles.remove(&self.shared.order_id))
            })
            .ok()
            .flatten();
        drop(parked);
    }
}

#[cfg(test)]
fn parked_default_handles() -> usize {
    DEFAULT_HANDLES.with(|handles| handles.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ByteBudget;

    fn entry(key: u64) -> Arc<CacheEntry<u64, ()>> {
        Arc::new(CacheEntry::new(key, key + 1, Arc::new(()), 1))
    }

    fn drain(recency: &BufferedRecency<u64, ()>) -> Vec<u64> {
        recency.select_victims().map(|e| *e.key()).collect()
    }

    #[test]
    fn handle_buffers_until_capacity() {
        let recency = BufferedRecency::new(3, 0);
        let handle = recency.register();
        let entries: Vec<_> = (0..3).map(entry).collect();

        handle.record(&entries[0]);
        handle.record(&entries[1]);
        assert_eq!(handle.pending(), 2);
        assert_eq!(recency.len(), 0);

        handle.record(&entries[2]);
        assert_eq!(handle.pending(), 0);
        assert_eq!(recency.len(), 3);
        recency.check_invariants().unwrap();
    }

    #[test]
    fn selection_flushes_every_buffer_first() {
        let recency = BufferedRecency::new(64, 0);
        let a = recency.register();
        let b = recency.register();
        let entries: Vec<_> = (0..4).map(entry).collect();

        a.record(&entries[0]);
        b.record(&entries[1]);
        a.record(&entries[2]);
        b.record(&entries[3]);
        // Key 0 is touched again last; it must not be the first victim.
        b.record(&entries[0]);
        assert_eq!(recency.len(), 0);

        assert_eq!(drain(&recency), [1, 2, 3, 0]);
        assert_eq!(a.pending() + b.pending(), 0);
    }

    #[test]
    fn stale_touch_does_not_override_newer_one() {
        let recency = BufferedRecency::new(64, 0);
        let early = recency.register();
        let late = recency.register();
        let (x, y) = (entry(1), entry(2));

        early.record(&x);
        late.record(&y);
        late.record(&x);
        late.flush();
        // The older touch of x arrives after the newer one was applied.
        early.flush();

        recency.check_invariants().unwrap();
        assert_eq!(drain(&recency), [2, 1]);
    }

    #[test]
    fn detached_entries_are_skipped_on_flush() {
        let budget = ByteBudget::new(10, 0);
        budget.reserve(1);
        let recency = BufferedRecency::new(8, 0);
        let handle = recency.register();
        let x = entry(1);

        handle.record(&x);
        x.detach(&budget);
        recency.remove(&x);
        handle.flush();
        assert!(recency.is_empty());
    }

    #[test]
    fn dropping_handle_flushes_and_unregisters() {
        let recency = BufferedRecency::new(8, 0);
        let handle = recency.register();
        handle.record(&entry(5));
        assert_eq!(recency.registered_buffers(), 1);

        drop(handle);
        assert_eq!(recency.len(), 1);
        assert_eq!(recency.registered_buffers(), 0);
    }

    #[test]
    fn default_thread_handle_is_flushed_by_selection() {
        let recency = BufferedRecency::new(128, 0);
        let entries: Vec<_> = (0..3).map(entry).collect();
        for e in &entries {
            recency.on_touch(e);
        }
        recency.on_touch(&entries[0]);
        assert_eq!(recency.registered_buffers(), 1);
        assert_eq!(drain(&recency), [1, 2, 0]);
    }

    #[test]
    fn dropped_orders_release_their_thread_handle() {
        let before = parked_default_handles();
        for key in 0..1_000 {
            let recency = BufferedRecency::new(8, 0);
            recency.on_touch(&entry(key));
            assert_eq!(parked_default_handles(), before + 1);
        }
        assert_eq!(parked_default_handles(), before);
    }

    #[test]
    fn handles_of_orders_dropped_elsewhere_are_pruned() {
        std::thread::spawn(|| {
            let first = BufferedRecency::new(8, 0);
            first.on_touch(&entry(1));
            std::thread::spawn(move || drop(first)).join().unwrap();
            // Still parked here: the order was dropped on another thread.
            assert_eq!(parked_default_handles(), 1);

            let second = BufferedRecency::new(8, 0);
            second.on_touch(&entry(2));
            assert_eq!(parked_default_handles(), 1);
            second.flush();
            assert_eq!(second.len(), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn default_handle_flushes_on_thread_exit() {
        let recency = Arc::new(BufferedRecency::new(128, 0));
        let worker = Arc::clone(&recency);
        std::thread::spawn(move || {
            worker.on_touch(&entry(9));
        })
        .join()
        .unwrap();

        assert_eq!(recency.registered_buffers(), 0);
        assert_eq!(recency.len(), 1);
    }
}
