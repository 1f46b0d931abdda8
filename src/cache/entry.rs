//! A single cached response body plus its eviction bookkeeping.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::Notify;

/// One stored `(url, body)` pair.
///
/// The score fields (`hit_count`, `last_access`) and the reader count are
/// atomics so that readers holding only the store's shared lock can update
/// them, and so a reader can release its reference without any lock at all.
#[derive(Debug)]
pub struct CacheEntry {
    key: String,
    body: Bytes,
    hit_count: AtomicU64,
    last_access: AtomicU64,
    ref_count: AtomicUsize,
    released: Notify,
}

impl CacheEntry {
    pub(crate) fn new(key: String, body: Bytes, now: u64) -> Self {
        Self {
            key,
            body,
            hit_count: AtomicU64::new(1),
            last_access: AtomicU64::new(now),
            ref_count: AtomicUsize::new(0),
            released: Notify::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Number of readers currently streaming this body.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// The `(hit_count, last_access)` eviction score.
    pub(crate) fn score(&self) -> (u64, u64) {
        (self.hit_count(), self.last_access())
    }

    /// Registers a reader. Must be called while the store's entry list is locked
    /// (shared or exclusive) so an evictor cannot miss the new reference.
    pub(crate) fn acquire(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops a reader reference and stamps the access time. Wakes any evictor
    /// waiting on this entry once the last reader is gone.
    pub(crate) fn release(&self, now: u64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.released.notify_waiters();
        }
    }

    /// Resolves once no reader holds a reference.
    pub(crate) async fn wait_unreferenced(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking, so a release between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            if self.ref_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn info(&self) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            size: self.size(),
            hit_count: self.hit_count(),
            last_access: self.last_access(),
            ref_count: self.ref_count(),
        }
    }
}

/// A point-in-time copy of an entry's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub size: usize,
    pub hit_count: u64,
    pub last_access: u64,
    pub ref_count: usize,
}
