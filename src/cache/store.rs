//! The shared, byte-bounded response cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use super::entry::{CacheEntry, EntryInfo};
use super::stats::{CacheStats, Counters};
use super::{CacheLimits, InsertOutcome};

/// Response bodies keyed by request URL, bounded by total byte size.
///
/// Entries are kept in insertion order. Lookups scan under a shared lock and
/// pin the entry they found with a reference count; inserts (and any
/// evictions they cause) hold the exclusive lock for the whole sequence, so
/// only one structural change happens at a time.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use cacheproxy::cache::{CacheStore, InsertOutcome};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = CacheStore::new();
/// let outcome = store.insert("http://a.test/", Bytes::from_static(b"hello")).await;
/// assert_eq!(outcome, InsertOutcome::Inserted { evicted: 0 });
///
/// let hit = store.lookup("http://a.test/").await.unwrap();
/// assert_eq!(hit.body().as_ref(), b"hello");
/// # }
/// ```
#[derive(Debug)]
pub struct CacheStore {
    entries: RwLock<Vec<Arc<CacheEntry>>>,
    /// Only changed while `entries` is write-locked.
    total_size: AtomicUsize,
    /// Only changed while `entries` is write-locked.
    len: AtomicUsize,
    clock: AtomicU64,
    limits: CacheLimits,
    counters: Counters,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// Creates an empty store with the default 1 MiB / 100 KiB limits.
    pub fn new() -> Self {
        Self::with_limits(CacheLimits::default())
    }

    pub fn with_limits(limits: CacheLimits) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            total_size: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            limits,
            counters: Counters::default(),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Bytes currently stored.
    pub fn total_size(&self) -> usize {
        self.total_size.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len(), self.total_size())
    }

    /// Next logical timestamp. Strictly increasing across the store.
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Finds the entry cached under `url` and pins it for reading.
    ///
    /// A hit bumps the entry's hit count immediately; its access time is
    /// refreshed when the returned [`CacheHit`] is dropped. While the guard is
    /// alive the entry cannot be evicted.
    pub async fn lookup(&self, url: &str) -> Option<CacheHit<'_>> {
        let entries = self.entries.read().await;
        match entries.iter().find(|e| e.key() == url) {
            Some(entry) => {
                entry.acquire();
                self.counters.record_hit();
                Some(CacheHit {
                    entry: Arc::clone(entry),
                    store: self,
                })
            }
            None => {
                self.counters.record_miss();
                None
            }
        }
    }

    /// Returns `true` if `url` is cached. Unlike [`lookup`](Self::lookup) this
    /// leaves the eviction score untouched.
    pub async fn contains(&self, url: &str) -> bool {
        self.entries.read().await.iter().any(|e| e.key() == url)
    }

    /// Stores `body` under `url`, evicting entries until it fits.
    ///
    /// A URL that is already cached is left as is. A body larger than the
    /// object cap (or the whole cache) is declined.
    pub async fn insert(&self, url: impl Into<String>, body: Bytes) -> InsertOutcome {
        let url = url.into();
        let size = body.len();
        if size > self.limits.max_object_size || size > self.limits.max_cache_size {
            self.counters.record_declined();
            debug!(url = %url, size, "object too large to cache");
            return InsertOutcome::Declined;
        }

        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.key() == url) {
            self.counters.record_duplicate();
            return InsertOutcome::AlreadyPresent;
        }

        let mut evicted = 0;
        while self.total_size() + size > self.limits.max_cache_size {
            if self.evict_locked(&mut entries).await.is_none() {
                break;
            }
            evicted += 1;
        }

        let entry = CacheEntry::new(url, body, self.tick());
        debug!(url = entry.key(), size, evicted, "cached object");
        entries.push(Arc::new(entry));
        self.total_size.fetch_add(size, Ordering::AcqRel);
        self.len.fetch_add(1, Ordering::AcqRel);
        self.counters.record_insert();

        InsertOutcome::Inserted { evicted }
    }

    /// Evicts one entry chosen by the eviction score, waiting for its readers
    /// to finish first. Returns the evicted key, or `None` if the store is empty.
    pub async fn evict_one(&self) -> Option<String> {
        let mut entries = self.entries.write().await;
        self.evict_locked(&mut entries)
            .await
            .map(|e| e.key().to_owned())
    }

    async fn evict_locked(&self, entries: &mut Vec<Arc<CacheEntry>>) -> Option<Arc<CacheEntry>> {
        let idx = select_victim(entries.iter().map(|e| e.score()))?;
        let victim = Arc::clone(&entries[idx]);

        // New readers need the shared lock, which we hold exclusively, so
        // the count can only go down from here.
        victim.wait_unreferenced().await;

        entries.remove(idx);
        self.total_size.fetch_sub(victim.size(), Ordering::AcqRel);
        self.len.fetch_sub(1, Ordering::AcqRel);
        self.counters.record_eviction();
        debug!(url = victim.key(), size = victim.size(), "evicted object");

        Some(victim)
    }

    /// Metadata for every entry, in eviction scan order.
    pub async fn entries(&self) -> Vec<EntryInfo> {
        self.entries.read().await.iter().map(|e| e.info()).collect()
    }
}

/// Picks the eviction victim from `(hit_count, last_access)` scores given in
/// scan order.
///
/// The first entry seeds the running minima. Any later entry whose count
/// **and** time are both `<=` the current minima replaces the candidate, so
/// the last entry to satisfy both floors wins ties. An entry that is lower on
/// only one axis never displaces the candidate.
pub(crate) fn select_victim<I>(scores: I) -> Option<usize>
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let mut scores = scores.into_iter().enumerate();
    let (mut victim, (mut least_count, mut least_time)) = scores.next()?;

    for (idx, (count, time)) in scores {
        if count <= least_count && time <= least_time {
            least_count = count;
            least_time = time;
            victim = idx;
        }
    }

    Some(victim)
}

/// A pinned cache entry being read.
///
/// Dropping the guard releases the reference and stamps the entry's access time.
#[derive(Debug)]
pub struct CacheHit<'a> {
    entry: Arc<CacheEntry>,
    store: &'a CacheStore,
}

impl CacheHit<'_> {
    pub fn key(&self) -> &str {
        self.entry.key()
    }

    pub fn body(&self) -> &Bytes {
        self.entry.body()
    }

    pub fn size(&self) -> usize {
        self.entry.size()
    }
}

impl Drop for CacheHit<'_> {
    fn drop(&mut self) {
        self.entry.release(self.store.tick());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::{MAX_CACHE_SIZE, MAX_OBJECT_SIZE};

    fn body(len: usize) -> Bytes {
        Bytes::from(vec![b'x'; len])
    }

    fn small_store(max_cache_size: usize) -> CacheStore {
        CacheStore::with_limits(CacheLimits {
            max_cache_size,
            max_object_size: max_cache_size,
        })
    }

    async fn keys(store: &CacheStore) -> Vec<String> {
        store.entries().await.into_iter().map(|e| e.key).collect()
    }

    // == Victim selection ==

    #[test]
    fn victim_of_empty_is_none() {
        assert_eq!(select_victim(std::iter::empty()), None);
    }

    #[test]
    fn victim_single_entry() {
        assert_eq!(select_victim([(5, 5)]), Some(0));
    }

    #[test]
    fn victim_strictly_lower_on_both_axes() {
        assert_eq!(select_victim([(3, 10), (2, 4), (5, 1)]), Some(1));
    }

    #[test]
    fn victim_equal_counts_picks_oldest_time() {
        // (1,3) lowers the time floor; (1,5) fails it; (1,2) lowers it again.
        assert_eq!(select_victim([(1, 4), (1, 3), (1, 5), (1, 2)]), Some(3));
    }

    #[test]
    fn victim_full_tie_last_one_wins() {
        assert_eq!(select_victim([(2, 7), (2, 7), (2, 7)]), Some(2));
    }

    #[test]
    fn victim_equal_times_picks_lowest_count() {
        assert_eq!(select_victim([(4, 1), (2, 1), (3, 1)]), Some(1));
    }

    #[test]
    fn victim_lower_on_one_axis_only_does_not_displace() {
        // Second entry has fewer hits but is more recent; third is older but hotter.
        assert_eq!(select_victim([(3, 5), (1, 9), (8, 2)]), Some(0));
    }

    #[test]
    fn victim_floor_is_running_not_global() {
        // (2,3) becomes the candidate; (1,8) would be the global count minimum
        // but is newer than the floor, so it never qualifies.
        assert_eq!(select_victim([(5, 6), (2, 3), (1, 8), (2, 3)]), Some(3));
    }

    // == Lookup / insert ==

    #[tokio::test]
    async fn lookup_miss_and_hit() {
        let store = CacheStore::new();
        assert!(store.lookup("u1").await.is_none());

        store.insert("u1", body(500)).await;
        let hit = store.lookup("u1").await.unwrap();
        assert_eq!(hit.size(), 500);
        assert_eq!(hit.key(), "u1");
        drop(hit);

        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn lookup_updates_score() {
        let store = CacheStore::new();
        store.insert("u1", body(10)).await;
        let before = store.entries().await.remove(0);
        assert_eq!(before.hit_count, 1);

        let hit = store.lookup("u1").await.unwrap();
        let during = store.entries().await.remove(0);
        assert_eq!(during.hit_count, 2);
        assert_eq!(during.ref_count, 1);
        drop(hit);

        let after = store.entries().await.remove(0);
        assert_eq!(after.ref_count, 0);
        assert!(after.last_access > before.last_access);
    }

    #[tokio::test]
    async fn duplicate_insert_keeps_first_body() {
        let store = CacheStore::new();
        assert_eq!(
            store.insert("u", Bytes::from_static(b"first")).await,
            InsertOutcome::Inserted { evicted: 0 }
        );
        assert_eq!(
            store.insert("u", Bytes::from_static(b"second!")).await,
            InsertOutcome::AlreadyPresent
        );

        assert_eq!(store.len(), 1);
        assert_eq!(store.total_size(), 5);
        assert_eq!(store.lookup("u").await.unwrap().body().as_ref(), b"first");
    }

    #[tokio::test]
    async fn oversized_objects_are_declined() {
        let store = CacheStore::new();
        assert_eq!(
            store.insert("big", body(MAX_OBJECT_SIZE + 1)).await,
            InsertOutcome::Declined
        );
        assert_eq!(
            store.insert("edge", body(MAX_OBJECT_SIZE)).await,
            InsertOutcome::Inserted { evicted: 0 }
        );
        assert!(!store.contains("big").await);
        assert_eq!(store.stats().declined, 1);

        let tiny = small_store(100);
        assert_eq!(tiny.insert("x", body(101)).await, InsertOutcome::Declined);
        assert!(tiny.is_empty());
    }

    #[tokio::test]
    async fn empty_body_is_cached() {
        let store = CacheStore::new();
        store.insert("empty", Bytes::new()).await;
        assert!(store.contains("empty").await);
        assert_eq!(store.total_size(), 0);
    }

    #[tokio::test]
    async fn evict_one_on_empty_store() {
        let store = CacheStore::new();
        assert_eq!(store.evict_one().await, None);
    }

    #[tokio::test]
    async fn evict_one_removes_oldest_cold_entry() {
        let store = CacheStore::new();
        for key in ["a", "b", "c"] {
            store.insert(key, body(10)).await;
        }
        // "a" gets hotter and newer; "b" is now the coldest.
        drop(store.lookup("a").await);

        assert_eq!(store.evict_one().await.as_deref(), Some("b"));
        assert_eq!(keys(&store).await, vec!["a", "c"]);
        assert_eq!(store.total_size(), 20);
    }

    #[tokio::test]
    async fn fills_to_exact_capacity_without_eviction() {
        let store = small_store(100);
        for i in 0..4 {
            store.insert(format!("k{i}"), body(25)).await;
        }
        assert_eq!(store.total_size(), 100);
        assert_eq!(store.stats().evictions, 0);
    }

    #[tokio::test]
    async fn insert_evicts_exactly_enough() {
        // Ten 100-byte entries fill 1000 of 1024 bytes.
        let store = small_store(1024);
        for i in 0..10 {
            store.insert(format!("k{i}"), body(100)).await;
        }
        // Make k0 and k1 hot so they survive.
        drop(store.lookup("k0").await);
        drop(store.lookup("k1").await);

        // Needs 250 bytes with 24 free: three cold entries must go.
        let outcome = store.insert("new", body(250)).await;
        assert_eq!(outcome, InsertOutcome::Inserted { evicted: 3 });

        assert_eq!(
            keys(&store).await,
            vec!["k0", "k1", "k5", "k6", "k7", "k8", "k9", "new"]
        );
        assert_eq!(store.total_size(), 950);
        assert_eq!(store.len(), 8);
        assert!(store.total_size() <= store.limits().max_cache_size);
    }

    #[tokio::test]
    async fn default_limits_match_constants() {
        let limits = CacheStore::new().limits();
        assert_eq!(limits.max_cache_size, MAX_CACHE_SIZE);
        assert_eq!(limits.max_object_size, MAX_OBJECT_SIZE);
    }

    // == Concurrency ==

    #[tokio::test]
    async fn eviction_waits_for_active_reader() {
        let store = Arc::new(small_store(100));
        store.insert("old", body(60)).await;

        let hit = store.lookup("old").await.unwrap();

        let inserter = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.insert("new", body(60)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!inserter.is_finished(), "eviction must wait for the reader");
        assert_eq!(hit.body().len(), 60);
        drop(hit);

        let outcome = tokio::time::timeout(Duration::from_secs(1), inserter)
            .await
            .expect("insert should complete once the reader is done")
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted { evicted: 1 });
        assert_eq!(keys(&store).await, vec!["new"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_and_lookups_keep_invariants() {
        let store = Arc::new(small_store(4096));
        let mut tasks = Vec::new();

        for t in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("k{}", (t * 7 + i) % 40);
                    if i % 3 == 0 {
                        store.insert(key, body(100 + (i * 13) % 400)).await;
                    } else if let Some(hit) = store.lookup(&key).await {
                        assert!(hit.size() >= 100);
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let entries = store.entries().await;
        let sum: usize = entries.iter().map(|e| e.size).sum();
        assert_eq!(sum, store.total_size());
        assert!(sum <= 4096);
        assert!(entries.iter().all(|e| e.ref_count == 0));

        let mut seen = std::collections::HashSet::new();
        assert!(entries.iter().all(|e| seen.insert(e.key.clone())));
    }
}
