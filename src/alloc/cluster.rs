//! Cold region: large-page cluster allocation
//!
//! A cluster is one whole erase block carrying a single 64 KiB page into
//! which many cold objects are packed. Clusters come off a free list in
//! wear order and go back through erase once their page dies.

use std::collections::BTreeSet;

use crate::device::Geometry;
use crate::page::{BlockId, Lba};

use super::wear::WearLeveler;
use super::RegionAllocator;

pub struct ClusterRegion {
    geometry: Geometry,
    blocks: u32,
    free: BTreeSet<BlockId>,
    in_use: BTreeSet<BlockId>,
    pending: Vec<BlockId>,
}

impl ClusterRegion {
    pub fn new(geometry: Geometry, first_block: BlockId, blocks: u32) -> Self {
        Self {
            geometry,
            blocks,
            free: (first_block..first_block + blocks).collect(),
            in_use: BTreeSet::new(),
            pending: Vec::new(),
        }
    }
}

impl RegionAllocator for ClusterRegion {
    fn allocate(&mut self, wear: &WearLeveler) -> Option<Lba> {
        let block = wear.choose_among(self.free.iter().copied())?;
        self.free.remove(&block);
        self.in_use.insert(block);
        Some(self.geometry.first_lba(block))
    }

    fn free(&mut self, lba: Lba) {
        let block = self.geometry.block_of(lba);
        if self.in_use.remove(&block) {
            self.pending.push(block);
        }
    }

    fn take_erasable(&mut self) -> Vec<BlockId> {
        std::mem::take(&mut self.pending)
    }

    fn erased(&mut self, block: BlockId) {
        self.free.insert(block);
    }

    fn requeue(&mut self, block: BlockId) {
        self.pending.push(block);
    }

    fn free_blocks(&self) -> u32 {
        self.free.len() as u32
    }

    fn pending_blocks(&self) -> u32 {
        self.blocks - self.free.len() as u32 - self.in_use.len() as u32
    }

    fn total_blocks(&self) -> u32 {
        self.blocks
    }

    fn allocated_pages(&self) -> u64 {
        self.in_use.len() as u64 * self.geometry.pages_per_block as u64
    }
}
