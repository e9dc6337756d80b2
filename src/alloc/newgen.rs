//! New-generation region: sequential cursor allocation
//!
//! Pages are handed out in LBA order inside the active block. When the block
//! is exhausted it is sealed and the least-worn free block becomes active.
//! A sealed block whose pages have all died is queued for erase; GC can pick
//! the sealed block with the fewest live pages as an evacuation victim.

use std::collections::BTreeSet;

use crate::device::Geometry;
use crate::page::{BlockId, Lba};

use super::wear::WearLeveler;
use super::RegionAllocator;

struct Cursor {
    block: BlockId,
    next_page: u32,
}

pub struct NewGenRegion {
    geometry: Geometry,
    first_block: BlockId,
    blocks: u32,
    free: BTreeSet<BlockId>,
    sealed: BTreeSet<BlockId>,
    pending: Vec<BlockId>,
    active: Option<Cursor>,
    /// Allocated, not yet freed pages per block (indexed from `first_block`)
    live: Vec<u32>,
}

impl NewGenRegion {
    pub fn new(geometry: Geometry, first_block: BlockId, blocks: u32) -> Self {
        Self {
            geometry,
            first_block,
            blocks,
            free: (first_block..first_block + blocks).collect(),
            sealed: BTreeSet::new(),
            pending: Vec::new(),
            active: None,
            live: vec![0; blocks as usize],
        }
    }

    fn live_mut(&mut self, block: BlockId) -> Option<&mut u32> {
        self.live.get_mut(block.checked_sub(self.first_block)? as usize)
    }

    fn live_of(&self, block: BlockId) -> u32 {
        block
            .checked_sub(self.first_block)
            .and_then(|i| self.live.get(i as usize).copied())
            .unwrap_or(0)
    }

    fn seal_active(&mut self) {
        if let Some(cursor) = self.active.take() {
            if self.live_of(cursor.block) == 0 {
                self.pending.push(cursor.block);
            } else {
                self.sealed.insert(cursor.block);
            }
        }
    }
}

impl RegionAllocator for NewGenRegion {
    fn allocate(&mut self, wear: &WearLeveler) -> Option<Lba> {
        let exhausted = self
            .active
            .as_ref()
            .map(|c| c.next_page >= self.geometry.pages_per_block)
            .unwrap_or(true);

        if exhausted {
            let next = wear.choose_among(self.free.iter().copied())?;
            self.seal_active();
            self.free.remove(&next);
            self.active = Some(Cursor {
                block: next,
                next_page: 0,
            });
        }

        let cursor = self.active.as_mut()?;
        let block = cursor.block;
        let lba = self.geometry.first_lba(block) + cursor.next_page as Lba;
        cursor.next_page += 1;
        if let Some(live) = self.live_mut(block) {
            *live += 1;
        }
        Some(lba)
    }

    fn free(&mut self, lba: Lba) {
        let block = self.geometry.block_of(lba);
        let now_dead = match self.live_mut(block) {
            Some(live) if *live > 0 => {
                *live -= 1;
                *live == 0
            }
            _ => false,
        };
        if now_dead && self.sealed.remove(&block) {
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

    fn victim(&self) -> Option<BlockId> {
        self.sealed
            .iter()
            .map(|&b| (self.live_of(b), b))
            .min()
            .map(|(_, b)| b)
    }

    fn free_blocks(&self) -> u32 {
        self.free.len() as u32
    }

    fn pending_blocks(&self) -> u32 {
        self.pending.len() as u32
    }

    fn total_blocks(&self) -> u32 {
        self.blocks
    }

    fn allocated_pages(&self) -> u64 {
        self.live.iter().map(|&n| n as u64).sum()
    }
}
