//! # BlitzKV
//!
//! The storage core of an SSD-optimized key-value store with:
//! - Online hot/cold classification of every object
//! - Region-aware placement (new-generation, hot slabs, cold clusters)
//! - Batched, LBA-sorted flushes from an active write buffer
//! - A clock-style read cache and wear-leveled block allocation
//! - Background reclamation and migration on a dedicated worker
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │            get / put / delete / metrics_snapshot            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Storage Manager                           │
//! │   (per-key write locks, lock-free reads, stale re-lookup)   │
//! └──┬──────────────┬──────────────┬──────────────┬─────────────┘
//!    │              │              │              │
//!    ▼              ▼              ▼              ▼
//! ┌────────┐  ┌────────────┐  ┌──────────┐  ┌──────────────┐
//! │ Index  │  │  Active    │  │  Read    │  │   Hotness    │
//! │(KeyIdx)│  │  Buffer    │  │  Cache   │  │   Tracker    │
//! └────────┘  └─────┬──────┘  └────▲─────┘  └──────┬───────┘
//!                   │ flush        │ fill          │ migrate
//!                   ▼ (LBA order)  │               ▼
//!             ┌────────────────────┴──────┐   ┌─────────────┐
//!             │  Device I/O (retry/backoff)│◀──│  GC worker  │
//!             └────────────┬──────────────┘   └──────┬──────┘
//!                          ▼                         │ erase
//!             ┌───────────────────────────┐          │
//!             │ Page Allocator + Wear     │◀─────────┘
//!             │ [newgen][hot][cold]       │
//!             └───────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod clock;

pub mod page;
pub mod index;
pub mod hotness;
pub mod cache;
pub mod buffer;
pub mod alloc;
pub mod device;
pub mod metrics;
pub mod storage;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BlitzError, Result};
pub use config::{Config, HotnessPolicy, IoPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{BlockDevice, FileDevice, Geometry, MemDevice};
pub use engine::Engine;
pub use hotness::MigrationState;
pub use index::{KeyIndex, MemIndex, ObjectMeta};
pub use metrics::MetricsSnapshot;
pub use page::RegionTag;
pub use storage::ReclaimReport;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of BlitzKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
