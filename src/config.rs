//! Configuration for BlitzKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BlitzError, Result};

/// Size of one device page (one LBA) in bytes
pub const PAGE_SIZE: usize = 4096;

/// Pages per erase block
pub const PAGES_PER_BLOCK: u32 = 16;

/// Size of a cold cluster page in bytes (one erase block)
pub const CLUSTER_SIZE: usize = PAGE_SIZE * PAGES_PER_BLOCK as usize;

/// Main configuration for a BlitzKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the device file
    /// Internal structure:
    ///   {data_dir}/
    ///     └── blitzkv.dev      (raw page device)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Device Geometry
    // -------------------------------------------------------------------------
    /// Blocks reserved for the new-generation region
    pub newgen_blocks: u32,

    /// Blocks reserved for the hot slab region
    pub hot_blocks: u32,

    /// Blocks reserved for the cold cluster region
    pub cold_blocks: u32,

    // -------------------------------------------------------------------------
    // Buffer / Cache Configuration
    // -------------------------------------------------------------------------
    /// Max dirty pages held by the active write buffer
    pub buffer_capacity: usize,

    /// Number of independently locked buffer shards
    pub buffer_shards: usize,

    /// Max clean pages held by the read cache
    pub cache_capacity: usize,

    /// Number of independently locked cache shards
    pub cache_shards: usize,

    /// Pages pulled from the buffer per flush batch
    pub flush_batch: usize,

    /// Number of independently locked hotness tracker shards
    pub tracker_shards: usize,

    // -------------------------------------------------------------------------
    // Reclamation Configuration
    // -------------------------------------------------------------------------
    /// Fraction of a region's blocks that must stay free before GC is queued
    pub gc_free_ratio: f64,

    /// Periodic hotness sweep; `None` disables the timer
    pub sweep_interval: Option<Duration>,

    // -------------------------------------------------------------------------
    // Policies
    // -------------------------------------------------------------------------
    pub hotness: HotnessPolicy,

    pub io: IoPolicy,
}

/// Tunables for the hotness scorer and migration state machine
#[derive(Debug, Clone, Copy)]
pub struct HotnessPolicy {
    /// Score at or above which an object is hot
    pub promotion_threshold: f32,

    /// Accesses per second that mark an object as a hot candidate
    pub candidate_rate: f32,

    /// How long a candidate must sustain its rate before it is classified
    pub observation_window: Duration,

    /// Clamp the TTL aging penalty to [0, 1]
    pub clamp_penalty: bool,
}

/// Device I/O retry policy
#[derive(Debug, Clone, Copy)]
pub struct IoPolicy {
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,

    /// First backoff delay, doubled per retry
    pub base_backoff: Duration,

    /// Upper bound on one backoff delay
    pub max_backoff: Duration,

    /// A write slower than this is treated as timed out and re-issued
    pub timeout: Duration,
}

impl Default for HotnessPolicy {
    fn default() -> Self {
        Self {
            promotion_threshold: 2.0,
            candidate_rate: 3.0,
            observation_window: Duration::from_secs(10),
            clamp_penalty: true,
        }
    }
}

impl Default for IoPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blitzkv_data"),
            newgen_blocks: 256,
            hot_blocks: 128,
            cold_blocks: 256,
            buffer_capacity: 1024, // 4 MiB of pages
            buffer_shards: 16,
            cache_capacity: 4096,
            cache_shards: 16,
            flush_batch: 64,
            tracker_shards: 16,
            gc_free_ratio: 0.125,
            sweep_interval: Some(Duration::from_secs(5)),
            hotness: HotnessPolicy::default(),
            io: IoPolicy::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Total number of erase blocks on the device
    pub fn total_blocks(&self) -> u32 {
        self.newgen_blocks + self.hot_blocks + self.cold_blocks
    }

    /// Reject geometry and policies the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.newgen_blocks < 2 || self.hot_blocks == 0 || self.cold_blocks == 0 {
            return Err(BlitzError::Config(
                "new-generation needs at least 2 blocks, hot and cold at least 1".to_string(),
            ));
        }
        if self.buffer_capacity == 0 || self.cache_capacity == 0 {
            return Err(BlitzError::Config(
                "buffer and cache capacity must be non-zero".to_string(),
            ));
        }
        if self.buffer_shards == 0
            || self.cache_shards == 0
            || self.tracker_shards == 0
            || self.flush_batch == 0
        {
            return Err(BlitzError::Config(
                "shard counts and flush batch must be non-zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.gc_free_ratio) {
            return Err(BlitzError::Config(format!(
                "gc_free_ratio must be in [0, 1), got {}",
                self.gc_free_ratio
            )));
        }
        if self.hotness.promotion_threshold <= 0.0 || self.hotness.candidate_rate <= 0.0 {
            return Err(BlitzError::Config(
                "hotness thresholds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (holds the device file)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the per-region block counts
    pub fn regions(mut self, newgen: u32, hot: u32, cold: u32) -> Self {
        self.config.newgen_blocks = newgen;
        self.config.hot_blocks = hot;
        self.config.cold_blocks = cold;
        self
    }

    /// Set the active write buffer capacity (in pages)
    pub fn buffer_capacity(mut self, pages: usize) -> Self {
        self.config.buffer_capacity = pages;
        self
    }

    /// Set the number of buffer shards
    pub fn buffer_shards(mut self, shards: usize) -> Self {
        self.config.buffer_shards = shards;
        self
    }

    /// Set the read cache capacity (in pages)
    pub fn cache_capacity(mut self, pages: usize) -> Self {
        self.config.cache_capacity = pages;
        self
    }

    /// Set the number of cache shards
    pub fn cache_shards(mut self, shards: usize) -> Self {
        self.config.cache_shards = shards;
        self
    }

    /// Set the number of pages written per flush batch
    pub fn flush_batch(mut self, pages: usize) -> Self {
        self.config.flush_batch = pages;
        self
    }

    /// Set the number of hotness tracker shards
    pub fn tracker_shards(mut self, shards: usize) -> Self {
        self.config.tracker_shards = shards;
        self
    }

    /// Set the free-block ratio below which GC is queued
    pub fn gc_free_ratio(mut self, ratio: f64) -> Self {
        self.config.gc_free_ratio = ratio;
        self
    }

    /// Set (or disable) the periodic hotness sweep
    pub fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set the hotness policy
    pub fn hotness(mut self, policy: HotnessPolicy) -> Self {
        self.config.hotness = policy;
        self
    }

    /// Set the device retry policy
    pub fn io(mut self, policy: IoPolicy) -> Self {
        self.config.io = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
