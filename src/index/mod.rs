//! Index Module
//!
//! The ordered key index that maps a key to its object metadata.
//!
//! ## Responsibilities
//! - Own the single `ObjectMeta` instance per key
//! - Answer `lookup(key)` for the read path
//! - Accept `update_location(key, location)` after flushes and relocations
//! - Let the core mutate access statistics in place through `update`
//!
//! The storage core only talks to the index through [`KeyIndex`]; it never
//! keeps a second copy of an object's metadata. [`MemIndex`] is the in-memory
//! implementation used by the engine and tests.

mod table;

pub use table::MemIndex;

use crate::clock::{seconds_between, Timestamp};
use crate::page::{Lba, PageId, RegionTag};

/// Where an object's current copy lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub page_id: PageId,
    pub lba: Lba,
    pub region: RegionTag,
    /// Entry index within the page
    pub slot: u16,
}

/// Per-key bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub key: Vec<u8>,
    pub location: Location,
    pub access_count: u64,
    pub create_time: Timestamp,
    pub last_access: Timestamp,
    /// Time-to-live in milliseconds, 0 = no expiry
    pub ttl_ms: u64,
    /// Last computed hotness score
    pub hotness: f32,
    /// Key + value bytes of the current copy
    pub logical_len: usize,
}

impl ObjectMeta {
    /// Metadata for a freshly written object
    pub fn new(key: Vec<u8>, location: Location, now: Timestamp, ttl_ms: u64, logical_len: usize) -> Self {
        Self {
            key,
            location,
            access_count: 1,
            create_time: now,
            last_access: now,
            ttl_ms,
            hotness: 0.0,
            logical_len,
        }
    }

    /// Age in seconds at `now`
    pub fn age_secs(&self, now: Timestamp) -> f32 {
        seconds_between(self.create_time, now)
    }

    /// Whether the TTL has elapsed at `now`
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.ttl_ms > 0 && now.saturating_sub(self.create_time) > self.ttl_ms
    }
}

/// Contract between the storage core and the ordered key index
pub trait KeyIndex: Send + Sync {
    /// Current metadata for `key`
    fn lookup(&self, key: &[u8]) -> Option<ObjectMeta>;

    /// Point `key` at a new location; false if the key is gone
    fn update_location(&self, key: &[u8], location: Location) -> bool;

    /// Insert or replace metadata, returning the previous value
    fn insert(&self, meta: ObjectMeta) -> Option<ObjectMeta>;

    /// Remove `key`, returning its metadata
    fn remove(&self, key: &[u8]) -> Option<ObjectMeta>;

    /// Mutate the metadata of `key` in place; false if the key is gone
    fn update(&self, key: &[u8], f: &mut dyn FnMut(&mut ObjectMeta)) -> bool;

    /// Number of keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys in sorted order
    fn keys(&self) -> Vec<Vec<u8>>;

    /// Sum of logical bytes of all live objects
    fn logical_bytes(&self) -> u64;
}
