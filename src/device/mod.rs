//! Device Module
//!
//! The boundary between the storage core and the physical device.
//!
//! ## Responsibilities
//! - Define the page-granular device contract ([`BlockDevice`])
//! - Describe the device layout ([`Geometry`])
//! - Retry transient failures with bounded backoff ([`DeviceIo`])
//!
//! ## Error Classes
//! ```text
//! ┌──────────────┬───────────┬──────────────────────────────────────┐
//! │ DeviceError  │ Class     │ Handling                             │
//! ├──────────────┼───────────┼──────────────────────────────────────┤
//! │ Io           │ transient │ retried with backoff                 │
//! │ TimedOut     │ transient │ retried with backoff                 │
//! │ Permanent    │ fatal     │ engine refuses further operations    │
//! │ Misaligned   │ caller    │ surfaced immediately                 │
//! │ OutOfRange   │ caller    │ surfaced immediately                 │
//! └──────────────┴───────────┴──────────────────────────────────────┘
//! ```

mod file;
mod io;
mod memory;

pub use file::FileDevice;
pub use io::DeviceIo;
pub use memory::MemDevice;

use std::ops::Range;
use std::time::Duration;

use thiserror::Error;

use crate::config::{Config, PAGES_PER_BLOCK, PAGE_SIZE};
use crate::page::{BlockId, Lba};

/// Result type for raw device calls
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Failure reported by a [`BlockDevice`]
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("transient I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation exceeded its {0:?} timeout")]
    TimedOut(Duration),

    #[error("permanent fault: {0}")]
    Permanent(String),

    #[error("buffer of {len} bytes is not one {page_size} byte page")]
    Misaligned { len: usize, page_size: usize },

    #[error("address {0} is outside the device")]
    OutOfRange(u64),
}

impl DeviceError {
    /// Whether the operation may succeed if simply re-issued
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Io(_) | DeviceError::TimedOut(_))
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, DeviceError::Permanent(_))
    }
}

/// Page size, erase-block size and block count of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub page_size: usize,
    pub pages_per_block: u32,
    pub blocks: u32,
}

impl Geometry {
    pub fn new(page_size: usize, pages_per_block: u32, blocks: u32) -> Self {
        Self {
            page_size,
            pages_per_block,
            blocks,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(PAGE_SIZE, PAGES_PER_BLOCK, config.total_blocks())
    }

    pub fn total_pages(&self) -> u64 {
        self.blocks as u64 * self.pages_per_block as u64
    }

    pub fn block_size(&self) -> usize {
        self.page_size * self.pages_per_block as usize
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.total_pages() * self.page_size as u64
    }

    pub fn block_of(&self, lba: Lba) -> BlockId {
        (lba / self.pages_per_block as u64) as BlockId
    }

    pub fn first_lba(&self, block: BlockId) -> Lba {
        block as Lba * self.pages_per_block as Lba
    }

    pub fn block_lbas(&self, block: BlockId) -> Range<Lba> {
        let first = self.first_lba(block);
        first..first + self.pages_per_block as Lba
    }

    pub fn contains(&self, lba: Lba) -> bool {
        lba < self.total_pages()
    }

    /// Byte offset of `lba`
    pub fn offset_of(&self, lba: Lba) -> u64 {
        lba * self.page_size as u64
    }
}

/// Page-granular storage device
///
/// Every read and write moves exactly one page; erase works on whole blocks.
/// Implementations must be safe to call from several threads at once.
pub trait BlockDevice: Send + Sync {
    fn geometry(&self) -> Geometry;

    /// Read the page at `lba`; always returns exactly one page
    fn read_page(&self, lba: Lba) -> DeviceResult<Vec<u8>>;

    /// Write one page-sized, page-aligned buffer at `lba`
    fn write_page(&self, lba: Lba, data: &[u8]) -> DeviceResult<()>;

    /// Erase every page of `block`
    fn erase_block(&self, block: BlockId) -> DeviceResult<()>;

    /// Make completed writes durable
    fn sync(&self) -> DeviceResult<()>;
}

/// Shared bounds checks for device implementations
pub(crate) fn check_page(geometry: &Geometry, lba: Lba, len: Option<usize>) -> DeviceResult<()> {
    if !geometry.contains(lba) {
        return Err(DeviceError::OutOfRange(lba));
    }
    match len {
        Some(len) if len != geometry.page_size => Err(DeviceError::Misaligned {
            len,
            page_size: geometry.page_size,
        }),
        _ => Ok(()),
    }
}
