//! Wear Leveler
//!
//! One erase counter per physical block. Counters only ever grow, and only
//! through [`WearLeveler::record_erase`], called once per device erase.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::page::BlockId;

/// Summary of erase counts across the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WearStats {
    pub blocks: u32,
    pub min_erases: u64,
    pub max_erases: u64,
    pub total_erases: u64,
}

/// Per-block erase counters
///
/// ## Concurrency:
/// - Counters are atomics; choosing a block is a lock-free scan and the
///   caller (a region allocator) already holds its region lock
pub struct WearLeveler {
    erase_counts: Box<[AtomicU64]>,
}

impl WearLeveler {
    pub fn new(blocks: u32) -> Self {
        Self {
            erase_counts: (0..blocks).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn blocks(&self) -> u32 {
        self.erase_counts.len() as u32
    }

    /// Least-worn block on the device; ties go to the lowest block id
    pub fn choose_block(&self) -> Option<BlockId> {
        self.choose_among(0..self.blocks())
    }

    /// Least-worn block among `candidates`; ties go to the lowest block id
    pub fn choose_among(&self, candidates: impl IntoIterator<Item = BlockId>) -> Option<BlockId> {
        candidates
            .into_iter()
            .filter_map(|b| self.erase_count(b).map(|count| (count, b)))
            .min()
            .map(|(_, b)| b)
    }

    /// Count one physical erase of `block`; returns the new count
    pub fn record_erase(&self, block: BlockId) -> Option<u64> {
        self.erase_counts
            .get(block as usize)
            .map(|c| c.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn erase_count(&self, block: BlockId) -> Option<u64> {
        self.erase_counts
            .get(block as usize)
            .map(|c| c.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> WearStats {
        let mut stats = WearStats {
            blocks: self.blocks(),
            min_erases: u64::MAX,
            ..WearStats::default()
        };
        for count in self.erase_counts.iter().map(|c| c.load(Ordering::Acquire)) {
            stats.min_erases = stats.min_erases.min(count);
            stats.max_erases = stats.max_erases.max(count);
            stats.total_erases += count;
        }
        if stats.blocks == 0 {
            stats.min_erases = 0;
        }
        stats
    }
}
