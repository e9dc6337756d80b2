//! Hot region: slab allocation with a per-block occupancy bitmap
//!
//! Every block is a slab of page-sized slots tracked by one `u64` word, so a
//! free slot is found with a single `trailing_ones`. Allocation stays on the
//! active slab until it fills, then moves to the least-worn partially used
//! slab (tight packing), and only then to the least-worn empty one. A slab
//! that empties out is queued for erase and skipped until it is erased.

use crate::device::Geometry;
use crate::page::{BlockId, Lba};

use super::wear::WearLeveler;
use super::RegionAllocator;

pub struct SlabRegion {
    geometry: Geometry,
    first_block: BlockId,
    occupancy: Vec<u64>,
    erasing: Vec<bool>,
    pending: Vec<BlockId>,
    active: Option<BlockId>,
    full_mask: u64,
}

impl SlabRegion {
    pub fn new(geometry: Geometry, first_block: BlockId, blocks: u32) -> Self {
        let ppb = geometry.pages_per_block;
        let full_mask = if ppb >= 64 { u64::MAX } else { (1u64 << ppb) - 1 };
        Self {
            geometry,
            first_block,
            occupancy: vec![0; blocks as usize],
            erasing: vec![false; blocks as usize],
            pending: Vec::new(),
            active: None,
            full_mask,
        }
    }

    fn local(&self, block: BlockId) -> Option<usize> {
        let i = block.checked_sub(self.first_block)? as usize;
        (i < self.occupancy.len()).then_some(i)
    }

    fn has_room(&self, i: usize) -> bool {
        !self.erasing[i] && self.occupancy[i] != self.full_mask
    }

    fn pick_slab(&self, wear: &WearLeveler) -> Option<BlockId> {
        let partial = (0..self.occupancy.len())
            .filter(|&i| self.has_room(i) && self.occupancy[i] != 0)
            .map(|i| self.first_block + i as BlockId);
        if let Some(block) = wear.choose_among(partial) {
            return Some(block);
        }
        let empty = (0..self.occupancy.len())
            .filter(|&i| self.has_room(i))
            .map(|i| self.first_block + i as BlockId);
        wear.choose_among(empty)
    }
}

impl RegionAllocator for SlabRegion {
    fn allocate(&mut self, wear: &WearLeveler) -> Option<Lba> {
        let usable = self
            .active
            .and_then(|b| self.local(b))
            .map(|i| self.has_room(i))
            .unwrap_or(false);
        if !usable {
            self.active = Some(self.pick_slab(wear)?);
        }

        let block = self.active?;
        let i = self.local(block)?;
        let slot = self.occupancy[i].trailing_ones();
        self.occupancy[i] |= 1 << slot;
        Some(self.geometry.first_lba(block) + slot as Lba)
    }

    fn free(&mut self, lba: Lba) {
        let block = self.geometry.block_of(lba);
        let i = match self.local(block) {
            Some(i) => i,
            None => return,
        };
        let slot = lba - self.geometry.first_lba(block);
        let bit = 1u64 << slot;
        if self.occupancy[i] & bit == 0 {
            return;
        }
        self.occupancy[i] &= !bit;

        if self.occupancy[i] == 0 && self.active != Some(block) {
            self.erasing[i] = true;
            self.pending.push(block);
        }
    }

    fn take_erasable(&mut self) -> Vec<BlockId> {
        std::mem::take(&mut self.pending)
    }

    fn erased(&mut self, block: BlockId) {
        if let Some(i) = self.local(block) {
            self.erasing[i] = false;
        }
    }

    fn requeue(&mut self, block: BlockId) {
        self.pending.push(block);
    }

    fn free_blocks(&self) -> u32 {
        (0..self.occupancy.len())
            .filter(|&i| !self.erasing[i] && self.occupancy[i] == 0)
            .count() as u32
    }

    fn pending_blocks(&self) -> u32 {
        self.erasing.iter().filter(|&&e| e).count() as u32
    }

    fn total_blocks(&self) -> u32 {
        self.occupancy.len() as u32
    }

    fn allocated_pages(&self) -> u64 {
        self.occupancy.iter().map(|w| w.count_ones() as u64).sum()
    }
}
