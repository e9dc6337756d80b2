//! Metrics
//!
//! Process-wide counters and device latency histograms, accumulated for the
//! lifetime of one open engine and reset only by reopening it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::CacheStats;
use crate::error::{BlitzError, Result};

/// Significant figures kept by the latency histograms
const SIGFIGS: u8 = 3;

/// Live counters
///
/// ## Concurrency:
/// - Counters: Relaxed atomics (monotonic, read only for reporting)
/// - Histograms: one Mutex each, held only to record a sample
pub struct Metrics {
    // Device
    reads: AtomicU64,
    writes: AtomicU64,
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    erases: AtomicU64,
    retries: AtomicU64,
    read_latency: Mutex<Histogram<u64>>,
    write_latency: Mutex<Histogram<u64>>,

    // Logical operations
    puts: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    logical_bytes_written: AtomicU64,

    // Write path and background work
    flush_batches: AtomicU64,
    flushed_pages: AtomicU64,
    gc_passes: AtomicU64,
    reclaim_attempts: AtomicU64,
    relocations: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
    corruptions: AtomicU64,
}

/// Counter that can be bumped through [`Metrics::incr`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Erases,
    Retries,
    Puts,
    Gets,
    Deletes,
    FlushBatches,
    GcPasses,
    ReclaimAttempts,
    Relocations,
    Promotions,
    Demotions,
    Corruptions,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let histogram = || {
            Histogram::<u64>::new(SIGFIGS)
                .map_err(|e| BlitzError::Config(format!("latency histogram: {}", e)))
        };
        Ok(Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            read_bytes: AtomicU64::new(0),
            write_bytes: AtomicU64::new(0),
            erases: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            read_latency: Mutex::new(histogram()?),
            write_latency: Mutex::new(histogram()?),
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            logical_bytes_written: AtomicU64::new(0),
            flush_batches: AtomicU64::new(0),
            flushed_pages: AtomicU64::new(0),
            gc_passes: AtomicU64::new(0),
            reclaim_attempts: AtomicU64::new(0),
            relocations: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            demotions: AtomicU64::new(0),
            corruptions: AtomicU64::new(0),
        })
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Erases => &self.erases,
            Counter::Retries => &self.retries,
            Counter::Puts => &self.puts,
            Counter::Gets => &self.gets,
            Counter::Deletes => &self.deletes,
            Counter::FlushBatches => &self.flush_batches,
            Counter::GcPasses => &self.gc_passes,
            Counter::ReclaimAttempts => &self.reclaim_attempts,
            Counter::Relocations => &self.relocations,
            Counter::Promotions => &self.promotions,
            Counter::Demotions => &self.demotions,
            Counter::Corruptions => &self.corruptions,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    /// One completed device page read
    pub fn record_read(&self, bytes: usize, latency: Duration) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.read_latency.lock().saturating_record(micros(latency));
    }

    /// One completed device page write
    pub fn record_write(&self, bytes: usize, latency: Duration) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.write_latency.lock().saturating_record(micros(latency));
    }

    /// A flushed batch of `pages` pages
    pub fn record_flush(&self, pages: usize) {
        self.flush_batches.fetch_add(1, Ordering::Relaxed);
        self.flushed_pages.fetch_add(pages as u64, Ordering::Relaxed);
    }

    /// Key + value bytes accepted from a caller
    pub fn record_logical_write(&self, bytes: usize) {
        self.logical_bytes_written
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Device bytes written per logical byte written
    pub fn write_amplification(&self) -> f64 {
        let logical = self.logical_bytes_written.load(Ordering::Relaxed);
        if logical == 0 {
            return 0.0;
        }
        self.write_bytes.load(Ordering::Relaxed) as f64 / logical as f64
    }

    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            reads: load(&self.reads),
            writes: load(&self.writes),
            read_bytes: load(&self.read_bytes),
            write_bytes: load(&self.write_bytes),
            read_latency: LatencySummary::from_histogram(&self.read_latency.lock()),
            write_latency: LatencySummary::from_histogram(&self.write_latency.lock()),
            erases: load(&self.erases),
            retries: load(&self.retries),
            puts: load(&self.puts),
            gets: load(&self.gets),
            deletes: load(&self.deletes),
            logical_bytes_written: load(&self.logical_bytes_written),
            write_amplification: self.write_amplification(),
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_evictions: cache.evictions,
            flush_batches: load(&self.flush_batches),
            flushed_pages: load(&self.flushed_pages),
            gc_passes: load(&self.gc_passes),
            reclaim_attempts: load(&self.reclaim_attempts),
            relocations: load(&self.relocations),
            promotions: load(&self.promotions),
            demotions: load(&self.demotions),
            corruptions: load(&self.corruptions),
        }
    }
}

fn micros(d: Duration) -> u64 {
    d.as_micros().min(u64::MAX as u128) as u64
}

/// Latency percentiles in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl LatencySummary {
    fn from_histogram(h: &Histogram<u64>) -> Self {
        if h.len() == 0 {
            return Self::default();
        }
        Self {
            p50_us: h.value_at_percentile(50.0),
            p95_us: h.value_at_percentile(95.0),
            p99_us: h.value_at_percentile(99.0),
            max_us: h.max(),
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_latency: LatencySummary,
    pub write_latency: LatencySummary,
    pub erases: u64,
    pub retries: u64,

    pub puts: u64,
    pub gets: u64,
    pub deletes: u64,
    pub logical_bytes_written: u64,
    pub write_amplification: f64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,

    pub flush_batches: u64,
    pub flushed_pages: u64,
    pub gc_passes: u64,
    pub reclaim_attempts: u64,
    pub relocations: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub corruptions: u64,
}

impl MetricsSnapshot {
    /// Fraction of cache lookups that hit
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "device:")?;
        writeln!(
            f,
            "  reads={} ({} bytes) writes={} ({} bytes) erases={} retries={}",
            self.reads, self.read_bytes, self.writes, self.write_bytes, self.erases, self.retries
        )?;
        writeln!(
            f,
            "  read latency  p50={}us p95={}us p99={}us max={}us",
            self.read_latency.p50_us,
            self.read_latency.p95_us,
            self.read_latency.p99_us,
            self.read_latency.max_us
        )?;
        writeln!(
            f,
            "  write latency p50={}us p95={}us p99={}us max={}us",
            self.write_latency.p50_us,
            self.write_latency.p95_us,
            self.write_latency.p99_us,
            self.write_latency.max_us
        )?;
        writeln!(f, "operations:")?;
        writeln!(
            f,
            "  puts={} gets={} deletes={} write amplification={:.2}",
            self.puts, self.gets, self.deletes, self.write_amplification
        )?;
        writeln!(
            f,
            "  cache hits={} misses={} evictions={} hit ratio={:.2}%",
            self.cache_hits,
            self.cache_misses,
            self.cache_evictions,
            self.cache_hit_ratio() * 100.0
        )?;
        writeln!(f, "background:")?;
        write!(
            f,
            "  flushes={} ({} pages) gc passes={} reclaim attempts={} relocations={} \
             promotions={} demotions={} corruptions={}",
            self.flush_batches,
            self.flushed_pages,
            self.gc_passes,
            self.reclaim_attempts,
            self.relocations,
            self.promotions,
            self.demotions,
            self.corruptions
        )
    }
}
