//! Cache Statistics Module
//!
//! Lock-free counters updated by every lookup and insert, and the
//! serializable snapshot handed out by [`CacheStore::stats`](super::CacheStore::stats).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters owned by the store.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    duplicates: AtomicU64,
    declined: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_declined(&self) {
        self.declined.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize, total_size: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            declined: self.declined.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
            total_size,
        }
    }
}

/// A point-in-time view of cache activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Bodies stored
    pub inserts: u64,
    /// Inserts skipped because the URL was already cached
    pub duplicates: u64,
    /// Inserts refused because the body was too large
    pub declined: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries currently stored
    pub entries: usize,
    /// Bytes currently stored
    pub total_size: usize,
}

impl CacheStats {
    /// Returns hits / (hits + misses), or 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let c = Counters::default();
        c.record_hit();
        c.record_hit();
        c.record_miss();
        c.record_insert();
        c.record_eviction();

        let s = c.snapshot(3, 1200);
        assert_eq!((s.hits, s.misses, s.inserts, s.evictions), (2, 1, 1, 1));
        assert_eq!((s.entries, s.total_size), (3, 1200));
    }

    #[test]
    fn hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let s = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((s.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(CacheStats::default()).unwrap();
        assert_eq!(json["total_size"], 0);
        assert_eq!(json["evictions"], 0);
    }
}
