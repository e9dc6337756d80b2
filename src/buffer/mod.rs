//! Active Write Buffer Module
//!
//! Bounded in-memory home of dirty pages until the device acknowledges them.
//!
//! ## Responsibilities
//! - Accept new pages and appends to open pages
//! - Serve read-your-write lookups ahead of the read cache and the device
//! - Hand out the least-recently-written pages as flush batches
//! - Release pages only after the write path confirms durability
//!
//! ## Page Lifecycle
//! ```text
//!   put ──▶ Resident ──flush_batch──▶ Flushing ──complete──▶ (removed)
//!              ▲                         │
//!              └───────── abort ─────────┘
//! ```
//! A flushing page is still readable but sealed: appends to it are refused
//! so the image handed to the device stays the page's final content.
//!
//! Open write heads (pages still receiving appends) are skipped by
//! `flush_batch` unless nothing else is resident; `drain_batch` takes them
//! too.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::Result;
use crate::page::{Entry, Lba, Page, PageId, RegionTag};

/// A dirty page plus its write recency
#[derive(Debug)]
struct BufferedPage {
    page: Page,
    /// Global write sequence of the last modification
    seq: u64,
    flushing: bool,
    /// Still a region's write head
    open: bool,
}

/// Outcome of [`ActiveBuffer::put`]
#[derive(Debug)]
pub enum PutOutcome {
    Inserted,
    /// An existing page with the same id was replaced
    Replaced,
    /// The buffer is at capacity; the page is handed back
    Full(Page),
}

/// Outcome of [`ActiveBuffer::discard`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    Removed,
    /// The page is being written; it leaves through `complete`
    Flushing,
    Absent,
}

/// One page of a flush batch, encoded for the device
#[derive(Debug, Clone)]
pub struct FlushItem {
    pub page_id: PageId,
    pub lba: Lba,
    pub region: RegionTag,
    pub image: Bytes,
}

/// Sharded, bounded map of dirty pages
///
/// ## Concurrency:
/// - Pages live in `shards`, each behind its own Mutex (page_id % N)
/// - `resident` is reserved with a compare-and-swap before an insert, so
///   concurrent writers can never push it past `max_size`
/// - `seq` orders writes across shards for least-recently-written selection
pub struct ActiveBuffer {
    shards: Box<[Mutex<HashMap<PageId, BufferedPage>>]>,
    max_size: usize,
    resident: AtomicUsize,
    seq: AtomicU64,
}

impl ActiveBuffer {
    pub fn new(max_size: usize, shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            max_size,
            resident: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
        }
    }

    fn shard(&self, id: PageId) -> &Mutex<HashMap<PageId, BufferedPage>> {
        &self.shards[(id % self.shards.len() as u64) as usize]
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve room for one more page
    fn reserve(&self) -> bool {
        self.resident
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_size).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.resident.fetch_sub(1, Ordering::AcqRel);
    }

    /// Insert or replace a dirty page
    pub fn put(&self, page: Page) -> PutOutcome {
        self.insert(page, false)
    }

    /// Insert a page that becomes a region's write head
    pub fn put_open(&self, page: Page) -> PutOutcome {
        self.insert(page, true)
    }

    fn insert(&self, page: Page, open: bool) -> PutOutcome {
        let id = page.id();
        let seq = self.next_seq();
        let mut shard = self.shard(id).lock();

        if let Some(slot) = shard.get_mut(&id) {
            slot.page = page;
            slot.seq = seq;
            slot.flushing = false;
            slot.open = open;
            return PutOutcome::Replaced;
        }

        if !self.reserve() {
            return PutOutcome::Full(page);
        }
        shard.insert(
            id,
            BufferedPage {
                page,
                seq,
                flushing: false,
                open,
            },
        );
        PutOutcome::Inserted
    }

    /// Append an entry to a resident page; None if the page is absent,
    /// sealed for flushing, or full
    pub fn append(&self, id: PageId, entry: Entry) -> Option<u16> {
        let seq = self.next_seq();
        let mut shard = self.shard(id).lock();
        let slot = shard.get_mut(&id)?;
        if slot.flushing {
            return None;
        }
        let index = slot.page.push(entry)?;
        slot.seq = seq;
        Some(index)
    }

    /// Copy of a buffered page
    pub fn get(&self, id: PageId) -> Option<Page> {
        self.shard(id).lock().get(&id).map(|b| b.page.clone())
    }

    /// Copy of one entry of a buffered page
    pub fn get_entry(&self, id: PageId, slot: u16) -> Option<Entry> {
        self.shard(id)
            .lock()
            .get(&id)
            .and_then(|b| b.page.entry(slot).cloned())
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.shard(id).lock().contains_key(&id)
    }

    /// The page stopped being a write head
    pub fn close(&self, id: PageId) {
        if let Some(b) = self.shard(id).lock().get_mut(&id) {
            b.open = false;
        }
    }

    /// Select up to `n` least-recently-written resident pages, seal them for
    /// flushing and return their encoded images.
    ///
    /// Open write heads are only selected when no other page is resident.
    pub fn flush_batch(&self, n: usize) -> Result<Vec<FlushItem>> {
        self.select(n, false)
    }

    /// Like `flush_batch`, but open write heads compete on recency too
    pub fn drain_batch(&self, n: usize) -> Result<Vec<FlushItem>> {
        self.select(n, true)
    }

    fn select(&self, n: usize, with_open: bool) -> Result<Vec<FlushItem>> {
        let mut closed: Vec<(u64, PageId)> = Vec::new();
        let mut open: Vec<(u64, PageId)> = Vec::new();
        for shard in self.shards.iter() {
            for (id, b) in shard.lock().iter().filter(|(_, b)| !b.flushing) {
                if b.open && !with_open {
                    open.push((b.seq, *id));
                } else {
                    closed.push((b.seq, *id));
                }
            }
        }
        let mut candidates = if closed.is_empty() { open } else { closed };
        candidates.sort_unstable();
        candidates.truncate(n);

        let mut batch = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            let mut shard = self.shard(id).lock();
            let buffered = match shard.get_mut(&id) {
                Some(b) if !b.flushing => b,
                _ => continue,
            };

            let image = match buffered.page.encode() {
                Ok(image) => image,
                Err(e) => {
                    drop(shard);
                    self.abort(batch.iter().map(|item: &FlushItem| item.page_id));
                    return Err(e);
                }
            };
            buffered.flushing = true;
            batch.push(FlushItem {
                page_id: id,
                lba: buffered.page.lba(),
                region: buffered.page.region(),
                image,
            });
        }
        Ok(batch)
    }

    /// Remove pages whose flush the device acknowledged
    pub fn complete(&self, ids: impl IntoIterator<Item = PageId>) -> usize {
        let mut removed = 0;
        for id in ids {
            let mut shard = self.shard(id).lock();
            if shard.get(&id).map(|b| b.flushing).unwrap_or(false) {
                shard.remove(&id);
                drop(shard);
                self.release();
                removed += 1;
            }
        }
        removed
    }

    /// Return pages of a failed flush to the resident set
    pub fn abort(&self, ids: impl IntoIterator<Item = PageId>) {
        for id in ids {
            if let Some(b) = self.shard(id).lock().get_mut(&id) {
                b.flushing = false;
            }
        }
    }

    /// Drop a page that no longer holds live data
    pub fn discard(&self, id: PageId) -> Discard {
        let mut shard = self.shard(id).lock();
        match shard.get(&id) {
            None => Discard::Absent,
            Some(b) if b.flushing => Discard::Flushing,
            Some(_) => {
                shard.remove(&id);
                drop(shard);
                self.release();
                Discard::Removed
            }
        }
    }

    /// Resident pages, including those being flushed
    pub fn len(&self) -> usize {
        self.resident.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
