//! Page table
//!
//! Bookkeeping for every page that currently owns an LBA: how many of its
//! entries are still referenced by the index, whether it can still receive
//! appends, and whether its image has reached the device.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use crate::page::{Lba, PageId, RegionTag};

/// State of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub lba: Lba,
    pub region: RegionTag,
    /// Entries still referenced by the index
    pub live: u32,
    /// No longer a write head; it will never receive another entry
    pub sealed: bool,
    /// The device acknowledged the page's image
    pub durable: bool,
    /// Died while its flush was in flight; release once the flush completes
    pub retire_pending: bool,
}

impl PageInfo {
    /// Whether the page holds nothing live and can never gain entries again
    pub fn is_dead(&self) -> bool {
        self.sealed && self.live == 0
    }
}

/// Pages by id, with a reverse LBA map for block evacuation
#[derive(Debug, Default)]
pub struct PageTable {
    pages: HashMap<PageId, PageInfo>,
    by_lba: BTreeMap<Lba, PageId>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened page holding `live` entries
    pub fn register(&mut self, id: PageId, lba: Lba, region: RegionTag, live: u32) {
        self.pages.insert(
            id,
            PageInfo {
                lba,
                region,
                live,
                sealed: false,
                durable: false,
                retire_pending: false,
            },
        );
        self.by_lba.insert(lba, id);
    }

    pub fn get(&self, id: PageId) -> Option<&PageInfo> {
        self.pages.get(&id)
    }

    pub fn get_mut(&mut self, id: PageId) -> Option<&mut PageInfo> {
        self.pages.get_mut(&id)
    }

    pub fn remove(&mut self, id: PageId) -> Option<PageInfo> {
        let info = self.pages.remove(&id)?;
        if self.by_lba.get(&info.lba) == Some(&id) {
            self.by_lba.remove(&info.lba);
        }
        Some(info)
    }

    /// Pages whose first LBA falls in `lbas`
    pub fn pages_in(&self, lbas: Range<Lba>) -> Vec<(PageId, PageInfo)> {
        self.by_lba
            .range(lbas)
            .filter_map(|(_, id)| self.pages.get(id).map(|info| (*id, *info)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Device bytes held by tracked pages
    pub fn allocated_bytes(&self) -> u64 {
        self.pages
            .values()
            .map(|info| info.region.size_class().bytes() as u64)
            .sum()
    }
}
