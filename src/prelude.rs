pub use crate::cache::{GlobalLruCache, Insertion};
pub use crate::config::{GlobalLruBuilder, GlobalLruConfig, OverflowPolicy};
pub use crate::error::{CacheError, ConfigError, InvariantError, ListenerError};
pub use crate::eviction::{EvictionListener, EvictionReport, NoopListener};
pub use crate::stats::CacheStatsSnapshot;
pub use crate::worker::CacheWorker;
