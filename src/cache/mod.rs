//! Shared in-memory response cache.
//!
//! A single [`CacheStore`] is created at startup and shared by every
//! connection handler. It holds at most [`MAX_CACHE_SIZE`] bytes of response
//! bodies, none larger than [`MAX_OBJECT_SIZE`], and makes room by evicting
//! the entry with the lowest combined (hit count, last access) score.

mod entry;
mod stats;
mod store;


pub use entry::{CacheEntry, EntryInfo};
pub use stats::CacheStats;
pub use store::{CacheHit, CacheStore};

/// Total bytes of response bodies the cache may hold.
pub const MAX_CACHE_SIZE: usize = 1024 * 1024;

/// Largest single response body that will be cached.
pub const MAX_OBJECT_SIZE: usize = 100 * 1024;

/// Size bounds for a [`CacheStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_cache_size: usize,
    pub max_object_size: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_cache_size: MAX_CACHE_SIZE,
            max_object_size: MAX_OBJECT_SIZE,
        }
    }
}

/// What [`CacheStore::insert`] did with a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored, after evicting `evicted` other entries.
    Inserted { evicted: usize },
    /// The URL was already cached; the existing body was kept.
    AlreadyPresent,
    /// The body exceeds the object or cache size limit.
    Declined,
}

impl InsertOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}
