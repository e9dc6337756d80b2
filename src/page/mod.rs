//! Page Module
//!
//! Fixed-size units of physical storage and the objects packed into them.
//!
//! ## Responsibilities
//! - Identify pages (`PageId`), their device address (`Lba`) and region
//! - Pack variable-sized objects (`Entry`) into a page until it is full
//! - Encode/decode the aligned on-device image with a CRC32 checksum
//!
//! ## On-Device Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                                │
//! │   Magic "BKV1" (4) | Version u16 (2) | Region u8 | SizeClass u8  │
//! │   PageId u64 (8)   | Lba u64 (8)                                 │
//! │   PayloadLen u32 (4) | CRC32 u32 (4)                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Payload: bincode(Vec<Entry { key, value }>)                      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Zero padding up to the size class (4 KiB or 64 KiB)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod codec;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{CLUSTER_SIZE, PAGES_PER_BLOCK, PAGE_SIZE};

pub use codec::HEADER_SIZE;

/// Unique page identifier, never reused for the lifetime of the engine
pub type PageId = u64;

/// Logical block address of a 4 KiB device page
pub type Lba = u64;

/// Erase block identifier
pub type BlockId = u32;

/// bincode length prefix of the entry vector
const VEC_PREFIX: usize = 8;

/// bincode length prefixes of one entry's key and value
const ENTRY_OVERHEAD: usize = 16;

// =============================================================================
// Regions and Size Classes
// =============================================================================

/// Physical region a page lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionTag {
    /// Fresh writes, sequential cursor allocation
    NewGen,
    /// Frequently accessed pages, slab allocation
    Hot,
    /// Rarely accessed objects, packed into 64 KiB clusters
    Cold,
}

impl RegionTag {
    pub const ALL: [RegionTag; 3] = [RegionTag::NewGen, RegionTag::Hot, RegionTag::Cold];

    /// Dense index for per-region arrays
    pub fn index(self) -> usize {
        match self {
            RegionTag::NewGen => 0,
            RegionTag::Hot => 1,
            RegionTag::Cold => 2,
        }
    }

    /// Page size class used by this region
    pub fn size_class(self) -> SizeClass {
        match self {
            RegionTag::NewGen | RegionTag::Hot => SizeClass::Standard,
            RegionTag::Cold => SizeClass::Cluster,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        self.index() as u8
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RegionTag::NewGen),
            1 => Some(RegionTag::Hot),
            2 => Some(RegionTag::Cold),
            _ => None,
        }
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionTag::NewGen => "new-generation",
            RegionTag::Hot => "hot",
            RegionTag::Cold => "cold",
        };
        f.write_str(name)
    }
}

/// Physical page size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// 4 KiB, one LBA
    Standard,
    /// 64 KiB, one whole erase block
    Cluster,
}

impl SizeClass {
    /// Size in bytes
    pub fn bytes(self) -> usize {
        match self {
            SizeClass::Standard => PAGE_SIZE,
            SizeClass::Cluster => CLUSTER_SIZE,
        }
    }

    /// Number of consecutive LBAs the page spans
    pub fn lbas(self) -> u32 {
        match self {
            SizeClass::Standard => 1,
            SizeClass::Cluster => PAGES_PER_BLOCK,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            SizeClass::Standard => 0,
            SizeClass::Cluster => 1,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SizeClass::Standard),
            1 => Some(SizeClass::Cluster),
            _ => None,
        }
    }
}

// =============================================================================
// Entry
// =============================================================================

/// One stored object inside a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Bytes this entry occupies in the encoded payload
    pub fn encoded_len(&self) -> usize {
        ENTRY_OVERHEAD + self.key.len() + self.value.len()
    }

    /// Key + value bytes, without framing
    pub fn logical_len(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Largest key + value that fits an empty standard page
pub fn max_object_size() -> usize {
    PAGE_SIZE - HEADER_SIZE - VEC_PREFIX - ENTRY_OVERHEAD
}

// =============================================================================
// Page
// =============================================================================

/// A page of packed objects, owned by exactly one tier at a time
#[derive(Debug, Clone)]
pub struct Page {
    id: PageId,
    lba: Lba,
    region: RegionTag,
    size_class: SizeClass,
    dirty: bool,
    checksum: u32,
    entries: Vec<Entry>,
    payload_len: usize,
}

impl Page {
    /// Create an empty dirty page at `lba` in `region`
    pub fn new(id: PageId, lba: Lba, region: RegionTag) -> Self {
        Self {
            id,
            lba,
            region,
            size_class: region.size_class(),
            dirty: true,
            checksum: 0,
            entries: Vec::new(),
            payload_len: VEC_PREFIX,
        }
    }

    /// Append an entry; returns its slot, or None when the page is full
    pub fn push(&mut self, entry: Entry) -> Option<u16> {
        if !self.fits(&entry) || self.entries.len() >= u16::MAX as usize {
            return None;
        }
        let slot = self.entries.len() as u16;
        self.payload_len += entry.encoded_len();
        self.entries.push(entry);
        self.dirty = true;
        Some(slot)
    }

    /// Whether `entry` still fits
    pub fn fits(&self, entry: &Entry) -> bool {
        self.payload_len + entry.encoded_len() <= self.capacity()
    }

    /// Entry stored at `slot`
    pub fn entry(&self, slot: u16) -> Option<&Entry> {
        self.entries.get(slot as usize)
    }

    /// Iterate entries with their slots
    pub fn entries(&self) -> impl Iterator<Item = (u16, &Entry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i as u16, e))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Payload capacity (size class minus header)
    pub fn capacity(&self) -> usize {
        self.size_class.bytes() - HEADER_SIZE
    }

    /// Header plus encoded payload bytes
    pub fn used_bytes(&self) -> usize {
        HEADER_SIZE + self.payload_len
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn lba(&self) -> Lba {
        self.lba
    }

    pub fn region(&self) -> RegionTag {
        self.region
    }

    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Checksum of the last encoded or decoded image
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Mark the page as matching its persisted image
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page: id={} lba={} region={} size={} entries={} used={}",
            self.id,
            self.lba,
            self.region,
            self.size_class.bytes(),
            self.entries.len(),
            self.used_bytes()
        )
    }
}
