//! Allocation Module
//!
//! Physical placement of pages across the three device regions.
//!
//! ## Responsibilities
//! - Hand out LBAs per region, each with its own strategy
//! - Track freed pages and queue dead blocks for erase
//! - Route every erase through the [`WearLeveler`]
//!
//! ## Device Layout
//! ```text
//! block 0                                                      last block
//! ┌────────────────────┬──────────────────┬───────────────────────────┐
//! │   New-generation   │       Hot        │           Cold            │
//! │ sequential cursor  │ slab + bitmap    │ 64 KiB clusters           │
//! │ 4 KiB pages        │ 4 KiB pages      │ (one cluster = one block) │
//! └────────────────────┴──────────────────┴───────────────────────────┘
//! ```
//!
//! ## Block Lifecycle
//! ```text
//!   free ──allocate──▶ in use ──all pages freed──▶ pending erase
//!    ▲                                                   │
//!    └─────────────── erase + record_erase ──────────────┘
//! ```

mod cluster;
mod newgen;
mod slab;
mod wear;

pub use cluster::ClusterRegion;
pub use newgen::NewGenRegion;
pub use slab::SlabRegion;
pub use wear::{WearLeveler, WearStats};

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::Config;
use crate::device::Geometry;
use crate::error::{BlitzError, Result};
use crate::page::{BlockId, Lba, RegionTag};

/// Allocation strategy of one region
///
/// Implementations are driven under their region's lock, so they are plain
/// `&mut self` state machines.
pub trait RegionAllocator: Send {
    /// Next free page, or None when the region is exhausted
    fn allocate(&mut self, wear: &WearLeveler) -> Option<Lba>;

    /// Return a page previously handed out by `allocate`
    fn free(&mut self, lba: Lba);

    /// Drain the blocks that are ready to be erased
    fn take_erasable(&mut self) -> Vec<BlockId>;

    /// A drained block was erased and may be reused
    fn erased(&mut self, block: BlockId);

    /// Erasing a drained block failed; keep it queued
    fn requeue(&mut self, block: BlockId);

    /// Block whose live pages GC should evacuate, if the region supports it
    fn victim(&self) -> Option<BlockId> {
        None
    }

    fn free_blocks(&self) -> u32;

    fn pending_blocks(&self) -> u32;

    fn total_blocks(&self) -> u32;

    /// Pages currently handed out
    fn allocated_pages(&self) -> u64;
}

/// Occupancy of one region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionStats {
    pub region: RegionTag,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub pending_blocks: u32,
    pub allocated_pages: u64,
}

/// Region-aware page allocator
///
/// ## Concurrency:
/// - One Mutex per region: allocation decisions are serialized within a
///   region and never race with reclamation of the same region
/// - Regions are independent; a hot allocation does not wait on a cold one
pub struct PageAllocator {
    geometry: Geometry,
    ranges: [Range<BlockId>; 3],
    regions: [Mutex<Box<dyn RegionAllocator>>; 3],
    wear: Arc<WearLeveler>,
}

impl PageAllocator {
    /// Lay the regions out back to back: `[new-generation][hot][cold]`
    pub fn new(geometry: Geometry, newgen_blocks: u32, hot_blocks: u32, cold_blocks: u32) -> Self {
        let newgen = 0..newgen_blocks;
        let hot = newgen.end..newgen.end + hot_blocks;
        let cold = hot.end..hot.end + cold_blocks;

        let regions: [Mutex<Box<dyn RegionAllocator>>; 3] = [
            Mutex::new(Box::new(NewGenRegion::new(geometry, newgen.start, newgen_blocks))),
            Mutex::new(Box::new(SlabRegion::new(geometry, hot.start, hot_blocks))),
            Mutex::new(Box::new(ClusterRegion::new(geometry, cold.start, cold_blocks))),
        ];

        Self {
            geometry,
            ranges: [newgen, hot, cold],
            regions,
            wear: Arc::new(WearLeveler::new(geometry.blocks)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Geometry::from_config(config),
            config.newgen_blocks,
            config.hot_blocks,
            config.cold_blocks,
        )
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn wear(&self) -> &WearLeveler {
        &self.wear
    }

    /// Allocate one page of `region`'s size class
    ///
    /// Fails with `OutOfSpace` when the region has no free page left; the
    /// caller decides whether to reclaim and retry.
    pub fn allocate(&self, region: RegionTag, size_hint: usize) -> Result<Lba> {
        let max = region.size_class().bytes();
        if size_hint > max {
            return Err(BlitzError::ValueTooLarge {
                size: size_hint,
                max,
            });
        }
        self.regions[region.index()]
            .lock()
            .allocate(&self.wear)
            .ok_or(BlitzError::OutOfSpace(region))
    }

    /// Release a page of `region`
    pub fn free(&self, region: RegionTag, lba: Lba) {
        self.regions[region.index()].lock().free(lba);
    }

    /// Region that owns `lba`
    pub fn region_of(&self, lba: Lba) -> Option<RegionTag> {
        let block = self.geometry.block_of(lba);
        RegionTag::ALL
            .into_iter()
            .find(|r| self.ranges[r.index()].contains(&block))
    }

    /// Drain the blocks of `region` that are ready for erase
    pub fn take_erasable(&self, region: RegionTag) -> Vec<BlockId> {
        self.regions[region.index()].lock().take_erasable()
    }

    /// Record a completed erase and return the block to its free pool
    pub fn erased(&self, region: RegionTag, block: BlockId) {
        self.wear.record_erase(block);
        self.regions[region.index()].lock().erased(block);
    }

    /// Put back a block whose erase failed
    pub fn requeue(&self, region: RegionTag, block: BlockId) {
        self.regions[region.index()].lock().requeue(block);
    }

    /// Evacuation candidate of `region`
    pub fn victim(&self, region: RegionTag) -> Option<BlockId> {
        self.regions[region.index()].lock().victim()
    }

    /// LBAs covered by `block`
    pub fn block_lbas(&self, block: BlockId) -> Range<Lba> {
        self.geometry.block_lbas(block)
    }

    /// Whether `region`'s free blocks dropped below `ratio` of its size
    /// (never less than two blocks, never more than the region)
    pub fn below_threshold(&self, region: RegionTag, ratio: f64) -> bool {
        let guard = self.regions[region.index()].lock();
        let total = guard.total_blocks();
        let wanted = ((total as f64 * ratio).ceil() as u32).max(2).min(total);
        guard.free_blocks() < wanted
    }

    pub fn stats(&self, region: RegionTag) -> RegionStats {
        let guard = self.regions[region.index()].lock();
        RegionStats {
            region,
            total_blocks: guard.total_blocks(),
            free_blocks: guard.free_blocks(),
            pending_blocks: guard.pending_blocks(),
            allocated_pages: guard.allocated_pages(),
        }
    }
}
