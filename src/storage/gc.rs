//! Background reclamation and migration
//!
//! One worker thread drains a crossbeam channel of [`GcTask`]s so that
//! foreground writes never wait on erase or relocation cost.
//!
//! ## Reclamation Pass
//! ```text
//!  ┌───────────────────────────┐
//!  │ erase blocks whose pages  │◀────────────────────────┐
//!  │ all died (every region)   │                         │
//!  └─────────────┬─────────────┘                         │
//!                ▼                                       │
//!  new-generation below its free threshold? ──no──▶ done │
//!                │ yes                                   │
//!                ▼                                       │
//!  evacuate the sealed block with the fewest live pages  │
//!    Hot objects  → hot region                           │
//!    others       → cold region (cluster packing)        │
//!    target full  → back into new-generation ────────────┘
//! ```

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BlitzError, Result};
use crate::hotness::MigrationState;
use crate::metrics::Counter;
use crate::page::{BlockId, RegionTag};

use super::manager::Shared;

/// Victims evacuated per pass at most
const MAX_EVACUATIONS_PER_PASS: usize = 4;

/// Work for the background worker
#[derive(Debug)]
pub(crate) enum GcTask {
    /// Erase dead blocks and evacuate new-generation if it runs low
    Reclaim,
    /// Move one object after a migration decision
    Migrate { key: Vec<u8>, target: RegionTag },
    /// Reply once every earlier task is done
    Barrier(Sender<()>),
    Shutdown,
}

/// What one reclamation pass achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub blocks_erased: usize,
    pub victims: usize,
    pub objects_relocated: usize,
}

pub(crate) fn spawn_worker(shared: Arc<Shared>, rx: Receiver<GcTask>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("blitzkv-gc".to_string())
        .spawn(move || run(shared, rx))
}

fn run(shared: Arc<Shared>, rx: Receiver<GcTask>) {
    let interval = shared.config.sweep_interval;
    let mut last_sweep = Instant::now();
    debug!(?interval, "gc worker started");

    loop {
        let task = match interval {
            Some(every) => {
                let wait = every.saturating_sub(last_sweep.elapsed());
                match rx.recv_timeout(wait.max(Duration::from_millis(1))) {
                    Ok(task) => Some(task),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(task) => Some(task),
                Err(_) => break,
            },
        };

        match task {
            Some(GcTask::Shutdown) => break,
            Some(GcTask::Barrier(reply)) => {
                let _ = reply.send(());
            }
            Some(_) | None if shared.is_failed() => {}
            Some(GcTask::Reclaim) => {
                shared.reclaim_pending.store(false, Ordering::Release);
                if let Err(e) = shared.reclaim_pass() {
                    let e = shared.observe(e);
                    warn!(error = %e, "background reclamation failed");
                }
            }
            Some(GcTask::Migrate { key, target }) => {
                if let Err(e) = shared.relocate(&key, target) {
                    let e = shared.observe(e);
                    warn!(%target, error = %e, "migration failed");
                }
            }
            None => {
                sweep_logged(&shared);
                last_sweep = Instant::now();
            }
        }

        if let Some(every) = interval {
            if last_sweep.elapsed() >= every && !shared.is_failed() {
                sweep_logged(&shared);
                last_sweep = Instant::now();
            }
        }
    }

    debug!("gc worker stopped");
}

fn sweep_logged(shared: &Shared) {
    if let Err(e) = shared.sweep() {
        let e = shared.observe(e);
        warn!(error = %e, "hotness sweep failed");
    }
}

impl Shared {
    /// Erase dead blocks, then evacuate new-generation victims while the
    /// region stays below its free-block threshold
    pub(crate) fn reclaim_pass(&self) -> Result<ReclaimReport> {
        let _gc = self.gc_lock.lock();
        self.metrics.incr(Counter::GcPasses);

        let mut report = ReclaimReport {
            blocks_erased: self.erase_dead_blocks()?,
            ..ReclaimReport::default()
        };

        let ratio = self.config.gc_free_ratio;
        while report.victims < MAX_EVACUATIONS_PER_PASS
            && self.allocator.below_threshold(RegionTag::NewGen, ratio)
        {
            let victim = match self.allocator.victim(RegionTag::NewGen) {
                Some(victim) => victim,
                None => break,
            };
            report.victims += 1;
            report.objects_relocated += self.evacuate(victim)?;
            report.blocks_erased += self.erase_dead_blocks()?;
        }

        if report.blocks_erased > 0 || report.objects_relocated > 0 {
            info!(
                erased = report.blocks_erased,
                victims = report.victims,
                relocated = report.objects_relocated,
                "reclamation pass"
            );
        }
        Ok(report)
    }

    /// Erase every block queued for erase in every region
    fn erase_dead_blocks(&self) -> Result<usize> {
        let mut erased = 0;
        for region in RegionTag::ALL {
            let blocks = self.allocator.take_erasable(region);
            for (i, &block) in blocks.iter().enumerate() {
                if let Err(e) = self.io.erase(block) {
                    for &rest in &blocks[i..] {
                        self.allocator.requeue(region, rest);
                    }
                    return Err(e);
                }
                self.allocator.erased(region, block);
                erased += 1;
                debug!(block, %region, "erased block");
            }
        }
        Ok(erased)
    }

    /// Move every live object out of `block`; returns objects moved
    fn evacuate(&self, block: BlockId) -> Result<usize> {
        let pages = self
            .page_table
            .lock()
            .pages_in(self.allocator.block_lbas(block));
        let mut moved = 0;

        for (page_id, info) in pages {
            if info.live == 0 {
                continue;
            }
            let page = match self.load_page(page_id, info.lba, info.region)? {
                Some(page) => page,
                None => continue,
            };

            for (slot, entry) in page.entries() {
                let _guard = self.key_lock(&entry.key).lock();
                let meta = match self.index.lookup(&entry.key) {
                    Some(meta) if meta.location.page_id == page_id && meta.location.slot == slot => meta,
                    _ => continue,
                };

                let target = match self.tracker.state(&entry.key) {
                    Some(MigrationState::Hot) => RegionTag::Hot,
                    _ => RegionTag::Cold,
                };
                let location = match self.append_entry(target, entry.clone()) {
                    Err(BlitzError::OutOfSpace(_)) => {
                        self.append_entry(RegionTag::NewGen, entry.clone())?
                    }
                    other => other?,
                };

                self.index.update_location(&entry.key, location);
                self.release_slot(&meta.location);
                self.metrics.incr(Counter::Relocations);
                moved += 1;
            }
        }

        debug!(block, moved, "evacuated new-generation block");
        Ok(moved)
    }

    /// Move one object into `target`; false if it is gone, already there,
    /// or `target` has no room
    pub(crate) fn relocate(&self, key: &[u8], target: RegionTag) -> Result<bool> {
        let _guard = self.key_lock(key).lock();

        let meta = match self.index.lookup(key) {
            Some(meta) => meta,
            None => return Ok(false),
        };
        if meta.location.region == target {
            return Ok(false);
        }

        let entry = match self.read_entry(&meta.location, key)? {
            Some(entry) => entry,
            None => {
                return Err(BlitzError::Corrupted {
                    lba: meta.location.lba,
                    reason: format!("page {} no longer holds the object", meta.location.page_id),
                })
            }
        };

        let location = match self.append_entry(target, entry) {
            Ok(location) => location,
            Err(BlitzError::OutOfSpace(region)) => {
                debug!(%region, "migration target full, object stays put until a later sweep");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.index.update_location(key, location);
        self.release_slot(&meta.location);

        self.metrics.incr(Counter::Relocations);
        match target {
            RegionTag::Hot => self.metrics.incr(Counter::Promotions),
            RegionTag::Cold => self.metrics.incr(Counter::Demotions),
            RegionTag::NewGen => {}
        }
        debug!(from = %meta.location.region, to = %target, lba = location.lba, "relocated object");
        Ok(true)
    }

    /// Re-score tracked objects and apply the migrations they call for.
    ///
    /// Settled objects still outside their region (an earlier move found
    /// the target full) are moved again.
    pub(crate) fn sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let transitions = self.tracker.sweep(self.index.as_ref(), now);
        let changed = transitions.len();

        for (key, t) in transitions {
            debug!(key_len = key.len(), from = ?t.from, to = ?t.to, "sweep transition");
            if let Some(target) = t.relocation() {
                self.relocate(&key, target)?;
            }
        }

        let mut replaced = 0;
        for (key, target) in self.tracker.placements() {
            let misplaced = self
                .index
                .lookup(&key)
                .map_or(false, |meta| meta.location.region != target);
            if misplaced && self.relocate(&key, target)? {
                replaced += 1;
            }
        }
        if replaced > 0 {
            debug!(replaced, "moved objects left behind by earlier migrations");
        }
        Ok(changed)
    }
}
