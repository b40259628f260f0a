//! Hit/miss accounting for the read path.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time snapshot of the cache's hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of read-path invocations served from the store.
    pub hits: u64,
    /// Number of read-path invocations that went to the filesystem.
    pub misses: u64,
}

/// Process-lifetime counters, incremented exactly once per read-path call.
///
/// A hit is recorded when a call finds a materialized entry or attaches to
/// an in-flight read; a miss when the call itself starts the underlying read.
#[derive(Debug, Default)]
pub(crate) struct ReadStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReadStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot both counters, optionally zeroing them in the same step.
    ///
    /// Resetting uses `swap`, so every increment lands either in the returned
    /// snapshot or in the fresh count — none are lost in between.
    pub(crate) fn snapshot(&self, reset: bool) -> CacheStats {
        if reset {
            CacheStats {
                hits: self.hits.swap(0, Ordering::Relaxed),
                misses: self.misses.swap(0, Ordering::Relaxed),
            }
        } else {
            CacheStats {
                hits: self.hits.load(Ordering::Relaxed),
                misses: self.misses.load(Ordering::Relaxed),
            }
        }
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}
