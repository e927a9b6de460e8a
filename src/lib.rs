//! globalru: a byte-budgeted global concurrent LRU record cache.
//!
//! The cache keeps decoded records resident under a hard byte ceiling and
//! evicts least-recently-used entries synchronously, inside the `put` that
//! crossed it. Recency is tracked by one of two strategies, picked once at
//! construction from `concurrency_level`:
//!
//! - [`StripedRecency`](recency::StripedRecency) (`concurrency_level > 0`):
//!   fixed segments, one lock each, victims merged across segment tails.
//! - [`BufferedRecency`](recency::BufferedRecency) (`concurrency_level == 0`):
//!   per-worker touch buffers merged into one shared order in batches.
//!
//! Entry points are [`GlobalLruBuilder`](config::GlobalLruBuilder) and
//! [`GlobalLruCache`](cache::GlobalLruCache); see `DESIGN.md` for the
//! concurrency protocol.

pub mod budget;
pub mod cache;
pub mod config;
pub mod ds;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod recency;
pub mod stats;
pub mod table;
pub mod worker;

pub mod prelude;
