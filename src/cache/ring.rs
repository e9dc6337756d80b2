//! Clock ring
//!
//! One shard of the read cache: a fixed-capacity circular buffer scanned by a
//! single hand.

use std::collections::HashMap;
use std::sync::Arc;

use crate::page::{Page, PageId};

/// Saturation point of the per-entry hotness counter
pub const MAX_HOTNESS: u8 = 7;

/// A clean page plus its eviction state
#[derive(Debug)]
pub struct CacheEntry {
    page: Arc<Page>,
    referenced: bool,
    hotness: u8,
}

impl CacheEntry {
    fn new(page: Arc<Page>) -> Self {
        Self {
            page,
            referenced: true,
            hotness: 1,
        }
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    pub fn hotness(&self) -> u8 {
        self.hotness
    }
}

/// Page evicted by an insertion
#[derive(Debug)]
pub struct Evicted {
    pub page_id: PageId,
    /// Reference bit of the entry at the moment the scan removed it
    pub was_referenced: bool,
}

/// Fixed-capacity clock ring
///
/// Eviction scan, starting at the hand:
/// - referenced: clear the bit, bump hotness (saturating at 7), advance
/// - unreferenced: decay hotness by one; at zero the entry is evicted and the
///   new page takes its slot, otherwise advance
#[derive(Debug)]
pub struct ClockRing {
    slots: Vec<Option<CacheEntry>>,
    index: HashMap<PageId, usize>,
    /// Slots vacated by invalidation
    vacant: Vec<usize>,
    hand: usize,
    capacity: usize,
}

impl ClockRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            vacant: Vec::new(),
            hand: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.index.contains_key(&id)
    }

    /// Look up a page and set its reference bit
    pub fn get(&mut self, id: PageId) -> Option<Arc<Page>> {
        let slot = *self.index.get(&id)?;
        let entry = self.slots[slot].as_mut()?;
        entry.referenced = true;
        Some(Arc::clone(&entry.page))
    }

    /// Eviction state of a cached page, without touching it
    pub fn peek(&self, id: PageId) -> Option<&CacheEntry> {
        let slot = *self.index.get(&id)?;
        self.slots[slot].as_ref()
    }

    /// Insert a clean page, evicting one entry if the ring is full
    pub fn insert(&mut self, page: Arc<Page>) -> Option<Evicted> {
        if self.capacity == 0 {
            return None;
        }

        let id = page.id();
        if let Some(&slot) = self.index.get(&id) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.page = page;
                entry.referenced = true;
                return None;
            }
        }

        if let Some(slot) = self.vacant.pop() {
            self.place(slot, page);
            return None;
        }

        if self.slots.len() < self.capacity {
            self.slots.push(None);
            let slot = self.slots.len() - 1;
            self.place(slot, page);
            return None;
        }

        let (slot, evicted) = self.scan();
        self.place(slot, page);
        self.hand = (slot + 1) % self.capacity;
        evicted
    }

    /// Remove a page; returns whether it was cached
    pub fn invalidate(&mut self, id: PageId) -> bool {
        match self.index.remove(&id) {
            Some(slot) => {
                self.slots[slot] = None;
                self.vacant.push(slot);
                true
            }
            None => false,
        }
    }

    fn place(&mut self, slot: usize, page: Arc<Page>) {
        self.index.insert(page.id(), slot);
        self.slots[slot] = Some(CacheEntry::new(page));
    }

    /// Advance the hand until a victim slot is found
    ///
    /// Terminates: every full revolution either clears reference bits or
    /// lowers hotness counters, which are bounded by `MAX_HOTNESS`.
    fn scan(&mut self) -> (usize, Option<Evicted>) {
        loop {
            let slot = self.hand;
            let entry = match self.slots[slot].as_mut() {
                Some(entry) => entry,
                None => return (slot, None),
            };

            if entry.referenced {
                entry.referenced = false;
                entry.hotness = (entry.hotness + 1).min(MAX_HOTNESS);
            } else {
                entry.hotness = entry.hotness.saturating_sub(1);
                if entry.hotness == 0 {
                    let page_id = entry.page.id();
                    let was_referenced = entry.referenced;
                    self.index.remove(&page_id);
                    self.slots[slot] = None;
                    return (
                        slot,
                        Some(Evicted {
                            page_id,
                            was_referenced,
                        }),
                    );
                }
            }

            self.hand = (self.hand + 1) % self.capacity;
        }
    }
}
