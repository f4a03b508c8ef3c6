//! Counters surfaced by `NDS CLEARSTATS` and consulted by the flush
//! coordinator. Plain atomics: the counters are independent of each
//! other and never need to be read-modify-written as a group.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct NdsStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    flush_successes: AtomicU64,
    flush_failures: AtomicU64,
}

impl NdsStats {
    pub fn new() -> NdsStats {
        NdsStats::default()
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_success(&self) {
        self.flush_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn flush_successes(&self) -> u64 {
        self.flush_successes.load(Ordering::Relaxed)
    }

    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// `NDS CLEARSTATS`: zero the cache-hit/miss counters. Flush
    /// success/failure counters are lifetime totals and are left alone,
    /// matching the original's separate `stat_numcommands`-style
    /// counters from its persistent flush stats.
    pub fn clear_cache_counters(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }
}
