//! Storage Manager
//!
//! Orchestrates the write path, the read path and page retirement.
//!
//! ## Responsibilities
//! - Append objects into per-region write-head pages held by the buffer
//! - Flush least-recently-written pages to the device in LBA order
//! - Resolve reads through buffer → cache → device, re-checking the index
//!   when a page turns out to be stale
//! - Release the LBA of a page once nothing references it any more
//! - Hand reclamation and migration work to the background worker

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::alloc::{PageAllocator, RegionStats, WearStats};
use crate::buffer::{ActiveBuffer, Discard, FlushItem, PutOutcome};
use crate::cache::ReadCache;
use crate::clock::Clock;
use crate::config::Config;
use crate::device::{BlockDevice, DeviceIo, Geometry};
use crate::error::{BlitzError, Result};
use crate::hotness::{HotnessTracker, MigrationState, Transition};
use crate::index::{KeyIndex, Location, ObjectMeta};
use crate::metrics::{Counter, Metrics, MetricsSnapshot};
use crate::page::{max_object_size, Entry, Lba, Page, PageId, RegionTag};

use super::gc::{self, GcTask, ReclaimReport};
use super::page_table::PageTable;

/// Stripes of the per-key write lock
const KEY_LOCK_STRIPES: usize = 256;

/// Re-resolutions a read attempts before trusting a failure
const MAX_READ_ATTEMPTS: usize = 4;

/// State shared between foreground callers and the background worker
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) index: Arc<dyn KeyIndex>,
    pub(crate) io: DeviceIo,
    pub(crate) buffer: ActiveBuffer,
    pub(crate) cache: ReadCache,
    pub(crate) allocator: PageAllocator,
    pub(crate) page_table: Mutex<PageTable>,
    pub(crate) tracker: HotnessTracker,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<Metrics>,

    /// Serializes writes and relocations of the same key
    key_locks: Box<[Mutex<()>]>,
    /// Open write-head page of each region
    heads: [Mutex<Option<(PageId, Lba)>>; 3],
    next_page_id: AtomicU64,

    /// Serializes reclamation passes
    pub(crate) gc_lock: Mutex<()>,
    pub(crate) reclaim_pending: AtomicBool,
    tasks: Sender<GcTask>,

    failed: AtomicBool,
    closed: AtomicBool,
}

/// The storage core
///
/// ## Concurrency:
/// - All methods take `&self`; foreground callers run in parallel
/// - Writes to one key are serialized by a striped key lock; reads take no
///   key lock and instead re-check the index when they hit a stale page
/// - Appends to a region's open page are serialized per region
/// - Reclamation and migrations run on one background thread (`blitzkv-gc`)
///   fed through a crossbeam channel
pub struct StorageManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StorageManager {
    /// Format `device` and start the background worker
    pub fn open(
        config: Config,
        device: Arc<dyn BlockDevice>,
        index: Arc<dyn KeyIndex>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let geometry = device.geometry();
        let expected = Geometry::from_config(&config);
        if geometry.page_size != expected.page_size
            || geometry.pages_per_block != expected.pages_per_block
            || geometry.blocks < expected.blocks
        {
            return Err(BlitzError::Config(format!(
                "device geometry {:?} cannot hold the configured layout {:?}",
                geometry, expected
            )));
        }

        let metrics = Arc::new(Metrics::new()?);
        let (tx, rx) = channel::unbounded();

        let shared = Arc::new(Shared {
            io: DeviceIo::new(device, config.io, Arc::clone(&metrics)),
            buffer: ActiveBuffer::new(config.buffer_capacity, config.buffer_shards),
            cache: ReadCache::new(config.cache_capacity, config.cache_shards),
            allocator: PageAllocator::from_config(&config),
            page_table: Mutex::new(PageTable::new()),
            tracker: HotnessTracker::new(config.hotness, config.tracker_shards),
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            heads: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
            next_page_id: AtomicU64::new(1),
            gc_lock: Mutex::new(()),
            reclaim_pending: AtomicBool::new(false),
            tasks: tx,
            failed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            index,
            clock,
            metrics,
            config,
        });

        let worker = gc::spawn_worker(Arc::clone(&shared), rx)?;

        info!(
            blocks = geometry.blocks,
            newgen = shared.config.newgen_blocks,
            hot = shared.config.hot_blocks,
            cold = shared.config.cold_blocks,
            "storage manager opened"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    // =========================================================================
    // Caller-facing operations
    // =========================================================================

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.shared.get(key)
    }

    /// Store `value` under `key`; `ttl_ms` of 0 never expires
    pub fn put(&self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<()> {
        self.shared.put(key, value, ttl_ms)
    }

    /// Remove `key`; false if it was not present
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.shared.delete(key)
    }

    // =========================================================================
    // Explicit control
    // =========================================================================

    /// Write one batch of least-recently-written pages; returns pages written
    pub fn flush_batch(&self) -> Result<usize> {
        self.shared.check_open()?;
        self.shared.flush_once(self.shared.config.flush_batch)
    }

    /// Write every buffered page
    pub fn flush(&self) -> Result<()> {
        self.shared.check_open()?;
        self.shared.flush_all()
    }

    /// Run one reclamation pass now
    pub fn reclaim(&self) -> Result<ReclaimReport> {
        self.shared.check_open()?;
        self.shared.reclaim_pass()
    }

    /// Re-score tracked objects and apply the resulting migrations
    pub fn sweep(&self) -> Result<usize> {
        self.shared.check_open()?;
        self.shared.sweep()
    }

    /// Move `key` to `target` now; false if it is gone or already there
    pub fn migrate(&self, key: &[u8], target: RegionTag) -> Result<bool> {
        self.shared.check_open()?;
        self.shared.relocate(key, target)
    }

    /// Block until every task queued so far has been processed
    pub fn quiesce(&self) -> Result<()> {
        let (tx, rx) = channel::bounded(1);
        if self.shared.tasks.send(GcTask::Barrier(tx)).is_err() {
            return Err(BlitzError::Closed);
        }
        rx.recv().map_err(|_| BlitzError::Closed)
    }

    /// Flush everything, stop the worker and sync the device
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let flushed = if self.shared.failed.load(Ordering::Acquire) {
            Ok(())
        } else {
            self.shared.flush_all().and_then(|_| self.shared.io.sync())
        };
        self.shared.closed.store(true, Ordering::Release);
        self.stop_worker();
        info!(keys = self.shared.index.len(), "storage manager closed");
        flushed
    }

    fn stop_worker(&self) {
        if let Some(handle) = self.worker.lock().take() {
            let _ = self.shared.tasks.send(GcTask::Shutdown);
            if handle.join().is_err() {
                error!("gc worker panicked");
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot(self.shared.cache.stats())
    }

    pub fn len(&self) -> usize {
        self.shared.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.index.is_empty()
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.shared.index.keys()
    }

    /// Device bytes held by live pages
    pub fn total_size(&self) -> u64 {
        self.shared.page_table.lock().allocated_bytes()
    }

    /// Device capacity in bytes
    pub fn total_capacity(&self) -> u64 {
        self.shared.io.geometry().capacity_bytes()
    }

    /// Allocated page bytes per live logical byte
    pub fn space_amplification(&self) -> f64 {
        let logical = self.shared.index.logical_bytes();
        if logical == 0 {
            return 0.0;
        }
        self.total_size() as f64 / logical as f64
    }

    /// Device bytes written per logical byte written
    pub fn write_amplification(&self) -> f64 {
        self.shared.metrics.write_amplification()
    }

    pub fn region_stats(&self) -> Vec<RegionStats> {
        RegionTag::ALL
            .into_iter()
            .map(|r| self.shared.allocator.stats(r))
            .collect()
    }

    pub fn wear_stats(&self) -> WearStats {
        self.shared.allocator.wear().stats()
    }

    pub fn migration_state(&self, key: &[u8]) -> Option<MigrationState> {
        self.shared.tracker.state(key)
    }

    /// Current index metadata of `key`
    pub fn object_meta(&self, key: &[u8]) -> Option<ObjectMeta> {
        self.shared.index.lookup(key)
    }

    pub fn buffered_pages(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn cached_pages(&self) -> usize {
        self.shared.cache.len()
    }

    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.stop_worker();
    }
}

// =============================================================================
// Shared: write path
// =============================================================================

impl Shared {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BlitzError::Closed);
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(BlitzError::EngineFailed);
        }
        Ok(())
    }

    /// Pass an error through, failing the engine if it is fatal
    pub(crate) fn observe(&self, err: BlitzError) -> BlitzError {
        if err.is_fatal() && !self.failed.swap(true, Ordering::AcqRel) {
            error!(error = %err, "fatal device fault, engine refuses further operations");
        }
        err
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn key_lock(&self, key: &[u8]) -> &Mutex<()> {
        &self.key_locks[crc32fast::hash(key) as usize % self.key_locks.len()]
    }

    pub(crate) fn enqueue(&self, task: GcTask) {
        if self.tasks.send(task).is_err() {
            debug!("gc worker gone, dropping task");
        }
    }

    fn put(&self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<()> {
        self.check_open()?;

        let entry = Entry::new(key, value);
        if entry.logical_len() > max_object_size() {
            return Err(BlitzError::ValueTooLarge {
                size: entry.logical_len(),
                max: max_object_size(),
            });
        }

        let result = match self.try_put(&entry, ttl_ms) {
            Err(BlitzError::OutOfSpace(region)) => {
                debug!(%region, "region exhausted, reclaiming before retry");
                self.metrics.incr(Counter::ReclaimAttempts);
                if let Err(e) = self.reclaim_pass() {
                    if e.is_fatal() {
                        return Err(self.observe(e));
                    }
                    warn!(error = %e, "reclamation pass failed");
                }
                self.try_put(&entry, ttl_ms)
            }
            other => other,
        };
        result.map_err(|e| self.observe(e))?;

        self.metrics.incr(Counter::Puts);
        self.metrics.record_logical_write(entry.logical_len());
        Ok(())
    }

    /// One write attempt under the key lock
    fn try_put(&self, entry: &Entry, ttl_ms: u64) -> Result<()> {
        let key = entry.key.as_slice();
        let _guard = self.key_lock(key).lock();

        let now = self.clock.now();
        let previous = self.index.lookup(key);

        let location = if self.tracker.state(key) == Some(MigrationState::Hot) {
            match self.append_entry(RegionTag::Hot, entry.clone()) {
                Err(BlitzError::OutOfSpace(_)) => self.append_entry(RegionTag::NewGen, entry.clone())?,
                other => other?,
            }
        } else {
            self.append_entry(RegionTag::NewGen, entry.clone())?
        };

        let mut meta = ObjectMeta::new(key.to_vec(), location, now, ttl_ms, entry.logical_len());
        if let Some(prev) = &previous {
            meta.access_count = prev.access_count + 1;
            meta.hotness = prev.hotness;
        }
        self.index.insert(meta);

        match previous {
            Some(prev) => {
                self.release_slot(&prev.location);
                if let Some(t) = self.tracker.on_access(key, &prev, now) {
                    self.on_transition(key, t);
                }
            }
            None => self.tracker.observe_new(key, now),
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        let _guard = self.key_lock(key).lock();

        let meta = match self.index.remove(key) {
            Some(meta) => meta,
            None => return Ok(false),
        };
        self.tracker.forget(key);
        self.release_slot(&meta.location);
        self.metrics.incr(Counter::Deletes);
        Ok(true)
    }

    /// Append `entry` to `region`'s write head, opening a new page when the
    /// head is sealed or full
    pub(crate) fn append_entry(&self, region: RegionTag, entry: Entry) -> Result<Location> {
        let mut head = self.heads[region.index()].lock();

        if let Some((page_id, lba)) = *head {
            if let Some(slot) = self.buffer.append(page_id, entry.clone()) {
                if let Some(info) = self.page_table.lock().get_mut(page_id) {
                    info.live += 1;
                }
                return Ok(Location {
                    page_id,
                    lba,
                    region,
                    slot,
                });
            }
        }

        // The head refused the entry and will never receive another one
        if let Some((old, _)) = head.take() {
            self.seal_page(old);
        }

        let size = entry.logical_len();
        let lba = self.allocator.allocate(region, entry.encoded_len())?;
        let page_id = self.next_page_id.fetch_add(1, Ordering::Relaxed);
        let mut page = Page::new(page_id, lba, region);
        let slot = match page.push(entry) {
            Some(slot) => slot,
            None => {
                self.allocator.free(region, lba);
                return Err(BlitzError::ValueTooLarge {
                    size,
                    max: max_object_size(),
                });
            }
        };

        self.page_table.lock().register(page_id, lba, region, 1);
        if let Err(e) = self.buffer_put(page) {
            self.page_table.lock().remove(page_id);
            self.allocator.free(region, lba);
            return Err(e);
        }

        trace!(page_id, lba, %region, "opened write head");
        *head = Some((page_id, lba));

        Ok(Location {
            page_id,
            lba,
            region,
            slot,
        })
    }

    /// Insert a new write-head page, flushing the oldest pages while the
    /// buffer is full
    fn buffer_put(&self, page: Page) -> Result<()> {
        let mut page = page;
        loop {
            match self.buffer.put_open(page) {
                PutOutcome::Inserted | PutOutcome::Replaced => return Ok(()),
                PutOutcome::Full(returned) => {
                    page = returned;
                    if self.flush_once(self.config.flush_batch)? == 0 {
                        // Everything resident is already being flushed by
                        // other callers
                        thread::yield_now();
                    }
                }
            }
        }
    }

    // =========================================================================
    // Page retirement
    // =========================================================================

    /// An entry at `location` is no longer referenced
    pub(crate) fn release_slot(&self, location: &Location) {
        let mut table = self.page_table.lock();
        let dead = match table.get_mut(location.page_id) {
            Some(info) => {
                info.live = info.live.saturating_sub(1);
                info.is_dead()
            }
            None => false,
        };
        if dead {
            self.retire_locked(&mut table, location.page_id);
        }
    }

    /// A page stopped being a write head
    fn seal_page(&self, page_id: PageId) {
        self.buffer.close(page_id);
        let mut table = self.page_table.lock();
        let dead = match table.get_mut(page_id) {
            Some(info) => {
                info.sealed = true;
                info.is_dead()
            }
            None => false,
        };
        if dead {
            self.retire_locked(&mut table, page_id);
        }
    }

    /// Give a dead page's LBA back to its region
    fn retire_locked(&self, table: &mut PageTable, page_id: PageId) {
        let info = match table.get(page_id) {
            Some(info) => *info,
            None => return,
        };

        if !info.durable && self.buffer.discard(page_id) == Discard::Flushing {
            if let Some(info) = table.get_mut(page_id) {
                info.retire_pending = true;
            }
            return;
        }

        table.remove(page_id);
        self.cache.invalidate(page_id);
        self.allocator.free(info.region, info.lba);
        trace!(page_id, lba = info.lba, region = %info.region, "retired page");
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Write one batch of up to `n` pages, sorted by LBA. Open write heads
    /// stay buffered while anything else is resident.
    pub(crate) fn flush_once(&self, n: usize) -> Result<usize> {
        let batch = self.buffer.flush_batch(n)?;
        self.write_batch(batch)
    }

    fn write_batch(&self, mut batch: Vec<FlushItem>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        batch.sort_by_key(|item| item.lba);

        let mut written = Vec::with_capacity(batch.len());
        for (i, item) in batch.iter().enumerate() {
            if let Err(e) = self.io.write_span(item.lba, &item.image) {
                self.complete_flush(&written);
                self.buffer.abort(batch[i..].iter().map(|item| item.page_id));
                error!(lba = item.lba, page_id = item.page_id, error = %e, "flush failed");
                return Err(self.observe(e));
            }
            written.push(item.page_id);
        }
        self.complete_flush(&written);

        self.metrics.record_flush(batch.len());
        debug!(
            pages = batch.len(),
            first_lba = batch[0].lba,
            last_lba = batch[batch.len() - 1].lba,
            "flushed batch"
        );

        self.check_reclaim_threshold();
        Ok(batch.len())
    }

    /// Flush until nothing resident is left
    pub(crate) fn flush_all(&self) -> Result<()> {
        while !self.buffer.is_empty() {
            let batch = self.buffer.drain_batch(self.config.flush_batch)?;
            if self.write_batch(batch)? == 0 {
                thread::yield_now();
            }
        }
        Ok(())
    }

    fn complete_flush(&self, ids: &[PageId]) {
        if ids.is_empty() {
            return;
        }
        let mut table = self.page_table.lock();
        self.buffer.complete(ids.iter().copied());
        for &id in ids {
            let pending = match table.get_mut(id) {
                Some(info) => {
                    info.durable = true;
                    info.retire_pending
                }
                None => false,
            };
            if pending {
                self.retire_locked(&mut table, id);
            }
        }
    }

    /// Queue a reclamation pass if any region runs low on free blocks
    pub(crate) fn check_reclaim_threshold(&self) {
        let ratio = self.config.gc_free_ratio;
        let needed = RegionTag::ALL.into_iter().any(|r| {
            self.allocator.below_threshold(r, ratio) || self.allocator.stats(r).pending_blocks > 0
        });
        if needed && !self.reclaim_pending.swap(true, Ordering::AcqRel) {
            self.enqueue(GcTask::Reclaim);
        }
    }

    // =========================================================================
    // Read path
    // =========================================================================

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.metrics.incr(Counter::Gets);

        let now = self.clock.now();
        let mut meta = match self.index.lookup(key) {
            Some(meta) => meta,
            None => return Ok(None),
        };
        if meta.is_expired(now) {
            self.expire(key, now);
            return Ok(None);
        }

        let mut attempts = 0;
        let entry = loop {
            let outcome = self.read_entry(&meta.location, key);
            if let Ok(Some(entry)) = outcome {
                break entry;
            }

            // Stale page or failed read: the object may have moved meanwhile
            match self.index.lookup(key) {
                None => return Ok(None),
                Some(fresh) if fresh.location != meta.location && attempts < MAX_READ_ATTEMPTS => {
                    attempts += 1;
                    meta = fresh;
                }
                Some(_) => {
                    let err = match outcome {
                        Err(e) => e,
                        _ => BlitzError::Corrupted {
                            lba: meta.location.lba,
                            reason: format!(
                                "expected page {} slot {}",
                                meta.location.page_id, meta.location.slot
                            ),
                        },
                    };
                    if let BlitzError::Corrupted { lba, reason } = &err {
                        self.metrics.incr(Counter::Corruptions);
                        error!(lba, reason = %reason, "corrupted page");
                    }
                    return Err(self.observe(err));
                }
            }
        };

        self.index.update(key, &mut |m| {
            m.access_count += 1;
            m.last_access = now;
        });
        if let Some(t) = self.tracker.on_access(key, &meta, now) {
            self.on_transition(key, t);
        }
        Ok(Some(entry.value))
    }

    /// Entry for `key` at `location`, or None when that location no longer
    /// holds it
    pub(crate) fn read_entry(&self, location: &Location, key: &[u8]) -> Result<Option<Entry>> {
        if let Some(entry) = self.buffer.get_entry(location.page_id, location.slot) {
            return Ok(Some(entry).filter(|e| e.key == key));
        }
        if let Some(page) = self.cache.get(location.page_id) {
            return Ok(page.entry(location.slot).filter(|e| e.key == key).cloned());
        }

        let page = match self.load_page(location.page_id, location.lba, location.region)? {
            Some(page) => page,
            None => return Ok(None),
        };
        Ok(page.entry(location.slot).filter(|e| e.key == key).cloned())
    }

    /// Page `page_id` from the buffer, the cache or the device; None when
    /// the LBA holds a different page
    pub(crate) fn load_page(&self, page_id: PageId, lba: Lba, region: RegionTag) -> Result<Option<Arc<Page>>> {
        if let Some(page) = self.buffer.get(page_id) {
            return Ok(Some(Arc::new(page)));
        }
        if let Some(page) = self.cache.get(page_id) {
            return Ok(Some(page));
        }

        let image = self.io.read_span(lba, region.size_class().lbas())?;
        let page = Page::decode(lba, &image)?;
        if page.id() != page_id || page.lba() != lba {
            trace!(page_id, lba, found = page.id(), "lba holds a different page");
            return Ok(None);
        }

        let page = Arc::new(page);
        self.cache.insert(Arc::clone(&page));
        Ok(Some(page))
    }

    /// Drop a key whose TTL elapsed
    fn expire(&self, key: &[u8], now: u64) {
        let _guard = self.key_lock(key).lock();
        let expired = self
            .index
            .lookup(key)
            .map(|m| m.is_expired(now))
            .unwrap_or(false);
        if !expired {
            return;
        }
        if let Some(meta) = self.index.remove(key) {
            self.tracker.forget(key);
            self.release_slot(&meta.location);
            debug!(key_len = key.len(), "expired object removed");
        }
    }

    // =========================================================================
    // Migration
    // =========================================================================

    /// Queue the relocation a transition calls for
    pub(crate) fn on_transition(&self, key: &[u8], t: Transition) {
        debug!(key_len = key.len(), from = ?t.from, to = ?t.to, "migration state changed");
        if let Some(target) = t.relocation() {
            self.enqueue(GcTask::Migrate {
                key: key.to_vec(),
                target,
            });
        }
    }
}
