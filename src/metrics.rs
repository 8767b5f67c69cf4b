//! Operation counters for a cache front-end.
//!
//! Recording is lock-free atomic increments; consumption goes through
//! [`MetricsSnapshot`] so monitoring code never observes torn multi-field
//! state it has to reason about. No exporter is bundled: management probes
//! live outside this crate and read snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters recorded by the cache front-end.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    deletes: AtomicU64,
    failures: AtomicU64,
    quarantines: AtomicU64,
    revivals: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_quarantine(&self) {
        self.quarantines.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_revival(&self) {
        self.revivals.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads all counters at one point in time.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            quarantines: self.quarantines.load(Ordering::Relaxed),
            revivals: self.revivals.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub deletes: u64,
    pub failures: u64,
    pub quarantines: u64,
    pub revivals: u64,
}
