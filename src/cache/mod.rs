//! Read Cache Module
//!
//! Clean-page cache in front of the device.
//!
//! ## Responsibilities
//! - Serve repeated reads of persisted pages without device I/O
//! - Evict with a clock scan that carries a 3-bit hotness counter, so a single
//!   sequential pass cannot flush out frequently read pages
//! - Never hold a dirty page; eviction never writes to the device
//!
//! ## Sharding
//! ```text
//! ReadCache
//! ├── Shard 0:  Mutex<ClockRing>   (page_id % N == 0)
//! ├── Shard 1:  Mutex<ClockRing>
//! ├── ...
//! └── Shard N-1
//! ```
//! Shard capacities sum exactly to the configured capacity, so the cache as a
//! whole never holds more pages than configured.

mod ring;

pub use ring::{CacheEntry, ClockRing, Evicted, MAX_HOTNESS};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::page::{Page, PageId};

/// Sharded clock cache of clean pages
///
/// ## Concurrency:
/// - Each shard is protected by its own Mutex; a lookup sets a reference bit,
///   so even hits take the shard lock briefly
/// - Hit/miss/eviction counters are atomics
pub struct ReadCache {
    shards: Box<[Mutex<ClockRing>]>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Counters reported by [`ReadCache::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident: usize,
    pub capacity: usize,
}

impl ReadCache {
    /// Create a cache holding at most `capacity` pages across `shards` rings
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shard_count = shards.clamp(1, capacity.max(1));
        let base = capacity / shard_count;
        let extra = capacity % shard_count;

        let shards = (0..shard_count)
            .map(|i| Mutex::new(ClockRing::new(base + usize::from(i < extra))))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard(&self, id: PageId) -> &Mutex<ClockRing> {
        &self.shards[(id % self.shards.len() as u64) as usize]
    }

    /// Look up a page; a hit sets its reference bit
    pub fn get(&self, id: PageId) -> Option<Arc<Page>> {
        let found = self.shard(id).lock().get(id);
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Cache a clean page. Dirty pages are refused.
    pub fn insert(&self, page: Arc<Page>) -> Option<Evicted> {
        if page.is_dirty() {
            return None;
        }
        let evicted = self.shard(page.id()).lock().insert(page);
        if evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Drop a page that is no longer valid
    pub fn invalidate(&self, id: PageId) -> bool {
        self.shard(id).lock().invalidate(id)
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.shard(id).lock().contains(id)
    }

    /// Pages currently cached
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident: self.len(),
            capacity: self.capacity,
        }
    }
}
