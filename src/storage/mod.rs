//! Storage Module
//!
//! The storage core: write path, read path, flushing and reclamation.
//!
//! ## Responsibilities
//! - Pack objects into pages held by the active write buffer
//! - Flush least-recently-written pages in ascending LBA order
//! - Serve reads from buffer, cache or device with integrity checks
//! - Release LBAs of dead pages and erase blocks in the background
//! - Carry out hot/cold migrations decided by the hotness tracker
//!
//! ## Device Layout
//! ```text
//! ┌──────────────────────┬──────────────────┬────────────────────────┐
//! │ New-generation       │ Hot              │ Cold                   │
//! │ 4 KiB pages,         │ 4 KiB slab pages │ 64 KiB cluster pages   │
//! │ log-structured       │ (bitmap per blk) │ (one per erase block)  │
//! └──────────────────────┴──────────────────┴────────────────────────┘
//!   every object lands     promoted objects   demoted and evacuated
//!   here first                                 objects
//! ```
//!
//! ## Page Image
//! ```text
//! ┌─────────────────────────────────┬───────────────────────┬─────────┐
//! │ Header (32)                     │ bincode entries       │ zero    │
//! │ magic·ver·region·class·id·lba   │ [(key, value), ...]   │ padding │
//! │ ·payload_len·crc32              │                       │         │
//! └─────────────────────────────────┴───────────────────────┴─────────┘
//! ```

mod gc;
mod manager;
mod page_table;

pub use gc::ReclaimReport;
pub use manager::StorageManager;
pub use page_table::{PageInfo, PageTable};
