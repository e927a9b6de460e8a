//! Aggregate byte accounting for the cache.
//!
//! [`ByteBudget`] knows nothing about keys; it only tracks how many bytes the
//! resident entries claim and decides when an eviction pass is due. All
//! mutation is a single atomic add or checked subtract, so every thread can
//! account without a shared lock.
//!
//! ```text
//!   0                      maximum - min_cleared        maximum
//!   ├───────────────────────────────┼───────────────────────┤
//!   │            used               │                       │ ← under budget
//!   ├───────────────────────────────┴───────────────────────┼──────┐
//!   │                         used                                 │ ← over budget
//!   └───────────────────────────────────────────────────────┴──────┘
//!                                                   bytes_over_budget() =
//!                                                   (used - maximum) + min_cleared
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free byte counter with a hard ceiling.
#[derive(Debug)]
pub struct ByteBudget {
    used: AtomicU64,
    maximum: u64,
    min_cleared: u64,
}

impl ByteBudget {
    /// Creates an empty budget.
    pub fn new(maximum: u64, min_cleared: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            maximum,
            min_cleared,
        }
    }

    /// Accounts `bytes` and returns `true` if the new total exceeds the
    /// ceiling.
    ///
    /// # Panics
    ///
    /// Panics if the total would overflow `u64`.
    #[inline]
    pub fn reserve(&self, bytes: u64) -> bool {
        let previous = self.used.fetch_add(bytes, Ordering::AcqRel);
        let total = previous
            .checked_add(bytes)
            .unwrap_or_else(|| panic!("byte budget overflow: {previous} + {bytes}"));
        total > self.maximum
    }

    /// Removes `bytes` from the total.
    ///
    /// # Panics
    ///
    /// Panics if more bytes are released than are accounted. That can only
    /// happen if entry accounting is broken, so it is not recoverable.
    #[inline]
    pub fn release(&self, bytes: u64) {
        if let Err(used) = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_sub(bytes)
            })
        {
            panic!("byte budget underflow: releasing {bytes} bytes with only {used} accounted");
        }
    }

    /// Bytes currently accounted.
    #[inline]
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// The hard ceiling.
    #[inline]
    pub fn maximum(&self) -> u64 {
        self.maximum
    }

    /// Minimum bytes an eviction pass reclaims once triggered.
    #[inline]
    pub fn min_cleared(&self) -> u64 {
        self.min_cleared
    }

    /// Bytes left before the ceiling is crossed.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.maximum.saturating_sub(self.used())
    }

    #[inline]
    pub fn is_over_budget(&self) -> bool {
        self.used() > self.maximum
    }

    /// Bytes that must be reclaimed to get back under the ceiling plus the
    /// `min_cleared` margin, or `0` when under budget.
    #[inline]
    pub fn bytes_over_budget(&self) -> u64 {
        match self.used().checked_sub(self.maximum) {
            Some(over) if over > 0 => over.saturating_add(self.min_cleared),
            _ => 0,
        }
    }

    /// Reclaim target for an eviction pass.
    #[inline]
    pub fn eviction_target(&self) -> u64 {
        self.min_cleared.max(self.bytes_over_budget())
    }
}
