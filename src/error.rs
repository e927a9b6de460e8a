//! Error types for the global LRU cache.
//!
//! ## Key Components
//!
//! - [`CacheError`]: Returned by inserting operations. Either the byte budget
//!   could not be honoured after an eviction pass (under
//!   [`OverflowPolicy::Reject`](crate::config::OverflowPolicy::Reject)) or the
//!   caller's size supplier / loader failed.
//! - [`ConfigError`]: Returned when cache configuration parameters are invalid
//!   (e.g. zero budget, out-of-range load factor).
//! - [`InvariantError`]: Returned by `check_invariants` when internal
//!   accounting no longer matches the resident entries.
//!
//! ## Example Usage
//!
//! ```
//! use globalru::config::GlobalLruBuilder;
//! use globalru::error::ConfigError;
//!
//! let bad: Result<_, ConfigError> = GlobalLruBuilder::new(1024)
//!     .load_factor(1.5)
//!     .try_build::<u64, Vec<u8>>();
//! assert!(bad.unwrap_err().to_string().contains("load_factor"));
//! ```

use std::convert::Infallible;

use thiserror::Error;

/// Boxed error returned by an [`EvictionListener`](crate::eviction::EvictionListener).
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of an inserting cache operation.
///
/// `E` is the error type of the caller's size supplier or loader. Operations
/// that take an explicit size use the default `Infallible`.
#[derive(Debug, Error)]
pub enum CacheError<E = Infallible> {
    /// The entry could not be kept within `maximum_bytes_in_memory` even
    /// after a full eviction pass, and the cache is configured to reject.
    #[error(
        "byte budget exceeded: entry of {requested} bytes rejected with {used} of {maximum} bytes in use after eviction"
    )]
    BudgetExceeded {
        requested: u64,
        used: u64,
        maximum: u64,
    },

    /// The size supplier or loader failed; nothing was inserted.
    #[error("size supplier failed: {0}")]
    Supplier(E),
}

impl<E> CacheError<E> {
    /// Returns `true` for [`CacheError::BudgetExceeded`].
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, CacheError::BudgetExceeded { .. })
    }

    /// Returns the supplier's error, if that is what failed.
    pub fn into_supplier(self) -> Option<E> {
        match self {
            CacheError::Supplier(err) => Some(err),
            CacheError::BudgetExceeded { .. } => None,
        }
    }
}

impl CacheError<Infallible> {
    /// Widens an infallible-supplier error into any supplier error type.
    pub fn widen<E>(self) -> CacheError<E> {
        match self {
            CacheError::BudgetExceeded {
                requested,
                used,
                maximum,
            } => CacheError::BudgetExceeded {
                requested,
                used,
                maximum,
            },
            CacheError::Supplier(never) => match never {},
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by [`GlobalLruBuilder::try_build`](crate::config::GlobalLruBuilder::try_build)
/// and [`GlobalLruConfig::validate`](crate::config::GlobalLruConfig::validate).
/// Carries a human-readable description of which parameter failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal cache invariants are violated.
///
/// Produced by [`GlobalLruCache::check_invariants`](crate::cache::GlobalLruCache::check_invariants),
/// which is only meaningful at a quiescent point (no operation in flight).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}
