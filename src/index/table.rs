//! In-memory index
//!
//! BTreeMap-based index with RwLock for concurrency.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{KeyIndex, Location, ObjectMeta};

/// Ordered in-memory key index
///
/// ## Concurrency:
/// - `entries`: Protected by RwLock (many concurrent readers, exclusive writer)
/// - `logical_bytes`: Atomic running total (lock-free reads)
pub struct MemIndex {
    entries: RwLock<BTreeMap<Vec<u8>, ObjectMeta>>,
    logical_bytes: AtomicU64,
}

impl MemIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            logical_bytes: AtomicU64::new(0),
        }
    }

    fn add_bytes(&self, n: usize) {
        self.logical_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn sub_bytes(&self, n: usize) {
        self.logical_bytes.fetch_sub(n as u64, Ordering::Relaxed);
    }
}

impl Default for MemIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndex for MemIndex {
    fn lookup(&self, key: &[u8]) -> Option<ObjectMeta> {
        self.entries.read().get(key).cloned()
    }

    fn update_location(&self, key: &[u8], location: Location) -> bool {
        match self.entries.write().get_mut(key) {
            Some(meta) => {
                meta.location = location;
                true
            }
            None => false,
        }
    }

    fn insert(&self, meta: ObjectMeta) -> Option<ObjectMeta> {
        let new_len = meta.logical_len;
        let previous = self.entries.write().insert(meta.key.clone(), meta);
        if let Some(old) = &previous {
            self.sub_bytes(old.logical_len);
        }
        self.add_bytes(new_len);
        previous
    }

    fn remove(&self, key: &[u8]) -> Option<ObjectMeta> {
        let removed = self.entries.write().remove(key);
        if let Some(old) = &removed {
            self.sub_bytes(old.logical_len);
        }
        removed
    }

    fn update(&self, key: &[u8], f: &mut dyn FnMut(&mut ObjectMeta)) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(meta) => {
                let before = meta.logical_len;
                f(meta);
                let after = meta.logical_len;
                drop(entries);
                if after != before {
                    self.sub_bytes(before);
                    self.add_bytes(after);
                }
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.read().keys().cloned().collect()
    }

    fn logical_bytes(&self) -> u64 {
        self.logical_bytes.load(Ordering::Relaxed)
    }
}
