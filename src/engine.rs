//! Engine Module
//!
//! The public entry point that wires a device, an index and a clock into
//! one storage core.
//!
//! ## Responsibilities
//! - Create the data directory and format the device file on open
//! - Expose get / put / delete and the metrics snapshot
//! - Forward explicit maintenance (flush, sweep, reclaim) to the core
//! - Flush and sync everything on close

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::alloc::{RegionStats, WearStats};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::device::{BlockDevice, FileDevice, Geometry};
use crate::error::{BlitzError, Result};
use crate::hotness::MigrationState;
use crate::index::{KeyIndex, MemIndex, ObjectMeta};
use crate::metrics::MetricsSnapshot;
use crate::page::RegionTag;
use crate::storage::{ReclaimReport, StorageManager};

/// The main storage engine
///
/// ## Concurrency Model: many callers, one background worker
///
/// - **Writes** (put/delete): run on the caller's thread, serialized per key
///   only; writes to different keys proceed in parallel
/// - **Reads** (get): never take a key lock; a read that races with a
///   relocation re-resolves the key through the index
/// - **Background**: reclamation, migrations and the periodic hotness sweep
///   run on one worker thread owned by the storage core
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Storage core (buffer, cache, allocator, GC worker)
    storage: StorageManager,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const DEVICE_FILENAME: &'static str = "blitzkv.dev";

    /// Open an engine backed by a freshly formatted device file
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Format `{data_dir}/blitzkv.dev` to the configured geometry
    /// 3. Start the storage core with an empty in-memory index
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;

        // Step 2: Format the device (contents of a previous run are discarded)
        let path = config.data_dir.join(Self::DEVICE_FILENAME);
        let device = FileDevice::format(&path, Geometry::from_config(&config))
            .map_err(|source| BlitzError::Device { op: "format", source })?;
        info!(path = %path.display(), "formatted device file");

        // Step 3: Start the core
        Self::open_with(
            config,
            Arc::new(device),
            Arc::new(MemIndex::new()),
            Arc::new(SystemClock),
        )
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Open on caller-supplied collaborators (in-memory devices, manual
    /// clocks, alternative indexes)
    pub fn open_with(
        config: Config,
        device: Arc<dyn BlockDevice>,
        index: Arc<dyn KeyIndex>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let storage = StorageManager::open(config.clone(), device, index, clock)?;
        Ok(Self { config, storage })
    }

    // =========================================================================
    // Core Operations
    // =========================================================================

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active write buffer (unflushed pages)
    /// 2. Read cache
    /// 3. Device, with checksum and identity checks
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.storage.get(key)
    }

    /// Put a key-value pair that never expires
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.storage.put(key, value, 0)
    }

    /// Put a key-value pair that expires `ttl` after this write
    pub fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        self.storage.put(key, value, ttl_ms)
    }

    /// Delete a key; false if it was not present
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.storage.delete(key)
    }

    /// Point-in-time copy of every counter
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.storage.metrics_snapshot()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Write every buffered page to the device
    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    /// Write one batch of least-recently-written pages
    pub fn flush_batch(&self) -> Result<usize> {
        self.storage.flush_batch()
    }

    /// Re-score tracked objects now; returns how many changed state
    pub fn sweep(&self) -> Result<usize> {
        self.storage.sweep()
    }

    /// Run one reclamation pass now
    pub fn reclaim(&self) -> Result<ReclaimReport> {
        self.storage.reclaim()
    }

    /// Move `key` into `target` now
    pub fn migrate(&self, key: &[u8], target: RegionTag) -> Result<bool> {
        self.storage.migrate(key, target)
    }

    /// Wait for the background worker to drain its queue
    pub fn quiesce(&self) -> Result<()> {
        self.storage.quiesce()
    }

    /// Close the engine gracefully
    ///
    /// Flushes any buffered pages and syncs the device
    pub fn close(self) -> Result<()> {
        self.storage.close()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// All live keys in sorted order
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.storage.keys()
    }

    /// Device bytes held by live pages
    pub fn total_size(&self) -> u64 {
        self.storage.total_size()
    }

    /// Device capacity in bytes
    pub fn total_capacity(&self) -> u64 {
        self.storage.total_capacity()
    }

    pub fn space_amplification(&self) -> f64 {
        self.storage.space_amplification()
    }

    pub fn write_amplification(&self) -> f64 {
        self.storage.write_amplification()
    }

    pub fn region_stats(&self) -> Vec<RegionStats> {
        self.storage.region_stats()
    }

    pub fn wear_stats(&self) -> WearStats {
        self.storage.wear_stats()
    }

    pub fn migration_state(&self, key: &[u8]) -> Option<MigrationState> {
        self.storage.migration_state(key)
    }

    pub fn object_meta(&self, key: &[u8]) -> Option<ObjectMeta> {
        self.storage.object_meta(key)
    }

    /// Pages waiting in the active write buffer
    pub fn buffered_pages(&self) -> usize {
        self.storage.buffered_pages()
    }

    /// Pages resident in the read cache
    pub fn cached_pages(&self) -> usize {
        self.storage.cached_pages()
    }

    /// Whether a fatal device fault has been observed
    pub fn is_failed(&self) -> bool {
        self.storage.is_failed()
    }
}
