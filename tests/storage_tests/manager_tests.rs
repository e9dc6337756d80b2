//! Tests for StorageManager
//!
//! These tests verify:
//! - Read-your-write from the buffer, then from the device through the cache
//! - Flush batches reach the device in ascending LBA order
//! - Open write heads stay buffered through batch flushes
//! - Overwrites and deletes release their old slots
//! - Dead blocks are erased by reclamation
//! - Explicit migration keeps the object readable
//! - Lifecycle errors after close

use std::sync::Arc;

use blitzkv::clock::ManualClock;
use blitzkv::config::Config;
use blitzkv::device::{Geometry, MemDevice};
use blitzkv::index::MemIndex;
use blitzkv::page::RegionTag;
use blitzkv::storage::StorageManager;
use blitzkv::BlitzError;

// =============================================================================
// Helper Functions
// =============================================================================

fn config() -> Config {
    Config::builder()
        .regions(4, 2, 2)
        .flush_batch(64)
        .sweep_interval(None)
        .build()
}

fn setup(config: Config) -> (Arc<MemDevice>, StorageManager) {
    let device = Arc::new(MemDevice::new(Geometry::from_config(&config)));
    let manager = StorageManager::open(
        config,
        device.clone(),
        Arc::new(MemIndex::new()),
        Arc::new(ManualClock::new(1_000)),
    )
    .unwrap();
    (device, manager)
}

fn key(i: usize) -> Vec<u8> {
    format!("key-{:03}", i).into_bytes()
}

// =============================================================================
// Read / Write Tests
// =============================================================================

#[test]
fn test_read_your_write_before_flush() {
    let (device, manager) = setup(config());
    manager.put(b"k", b"v", 0).unwrap();

    assert_eq!(manager.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert!(device.write_log().is_empty());
    assert_eq!(manager.buffered_pages(), 1);
}

#[test]
fn test_read_after_flush_goes_through_cache() {
    let (device, manager) = setup(config());
    manager.put(b"k", b"v", 0).unwrap();
    manager.flush().unwrap();
    assert_eq!(manager.buffered_pages(), 0);
    assert_eq!(device.write_log(), vec![0]);

    assert_eq!(manager.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(manager.get(b"k").unwrap(), Some(b"v".to_vec()));

    let snap = manager.metrics_snapshot();
    assert_eq!(snap.reads, 1);
    assert_eq!(snap.cache_hits, 1);
    assert_eq!(manager.cached_pages(), 1);
}

#[test]
fn test_missing_key() {
    let (_, manager) = setup(config());
    assert_eq!(manager.get(b"nope").unwrap(), None);
}

#[test]
fn test_overwrite_returns_latest() {
    let (_, manager) = setup(config());
    manager.put(b"k", b"v1", 0).unwrap();
    manager.flush().unwrap();
    manager.put(b"k", b"v2", 0).unwrap();

    assert_eq!(manager.get(b"k").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.object_meta(b"k").unwrap().access_count, 2);
}

#[test]
fn test_delete() {
    let (_, manager) = setup(config());
    manager.put(b"k", b"v", 0).unwrap();

    assert!(manager.delete(b"k").unwrap());
    assert!(!manager.delete(b"k").unwrap());
    assert_eq!(manager.get(b"k").unwrap(), None);
    assert!(manager.is_empty());
    assert_eq!(manager.migration_state(b"k"), None);
}

#[test]
fn test_value_too_large() {
    let (_, manager) = setup(config());
    let err = manager.put(b"k", &vec![0u8; 5_000], 0).unwrap_err();
    assert!(matches!(err, BlitzError::ValueTooLarge { .. }));
    assert!(manager.is_empty());
}

#[test]
fn test_small_objects_share_a_page() {
    let (_, manager) = setup(config());
    for i in 0..20 {
        manager.put(&key(i), b"small", 0).unwrap();
    }
    assert_eq!(manager.buffered_pages(), 1);
    assert_eq!(manager.total_size(), 4096);
    assert!(manager.space_amplification() > 1.0);
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_flush_batch_is_lba_sorted() {
    let (device, manager) = setup(config());
    let value = vec![1u8; 1_000];

    for i in 0..8 {
        manager.put(&key(i), &value, 0).unwrap();
    }
    // A hot page lands in the middle of the write sequence
    assert!(manager.migrate(&key(0), RegionTag::Hot).unwrap());
    for i in 8..16 {
        manager.put(&key(i), &value, 0).unwrap();
    }

    device.clear_logs();
    manager.flush().unwrap();

    let log = device.write_log();
    assert_eq!(log, vec![0, 1, 2, 3, 4, 5, 64]);
    assert!(log.windows(2).all(|w| w[0] < w[1]));

    for i in 0..16 {
        assert_eq!(manager.get(&key(i)).unwrap(), Some(value.clone()));
    }
}

#[test]
fn test_flush_batch_keeps_open_heads() {
    let (device, manager) = setup(config());
    let value = vec![1u8; 1_000];

    for i in 0..16 {
        manager.put(&key(i), &value, 0).unwrap();
    }
    assert!(manager.migrate(&key(0), RegionTag::Hot).unwrap());

    // New-generation head at lba 5 and hot head at lba 64 keep accepting appends
    device.clear_logs();
    assert_eq!(manager.flush_batch().unwrap(), 5);
    assert_eq!(device.write_log(), vec![0, 1, 2, 3, 4]);
    assert_eq!(manager.buffered_pages(), 2);

    manager.put(&key(16), &value, 0).unwrap();
    assert_eq!(manager.object_meta(&key(16)).unwrap().location.lba, 5);

    device.clear_logs();
    manager.flush().unwrap();
    assert_eq!(device.write_log(), vec![5, 64]);
    assert_eq!(manager.buffered_pages(), 0);
}

#[test]
fn test_failed_flush_keeps_pages_buffered() {
    let (device, manager) = setup(config());
    manager.put(b"k", b"v", 0).unwrap();

    device.fail_next_writes(100);
    assert!(manager.flush_batch().is_err());
    assert_eq!(manager.buffered_pages(), 1);
    assert!(!manager.is_failed());

    device.fail_next_writes(0);
    assert_eq!(manager.flush_batch().unwrap(), 1);
    assert_eq!(manager.get(b"k").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Reclamation Tests
// =============================================================================

#[test]
fn test_dead_block_is_erased() {
    let (device, manager) = setup(config());
    let value = vec![2u8; 3_000];

    for i in 0..16 {
        manager.put(&key(i), &value, 0).unwrap();
    }
    manager.flush().unwrap();
    for i in 0..16 {
        manager.put(&key(i), &value, 0).unwrap();
    }

    manager.reclaim().unwrap();
    manager.quiesce().unwrap();

    assert!(device.erase_log().contains(&0));
    assert!(manager.wear_stats().total_erases >= 1);
    assert!(manager.metrics_snapshot().gc_passes >= 1);
    for i in 0..16 {
        assert_eq!(manager.get(&key(i)).unwrap(), Some(value.clone()));
    }
}

// =============================================================================
// Migration Tests
// =============================================================================

#[test]
fn test_migrate_moves_object() {
    let (_, manager) = setup(config());
    manager.put(b"k", b"v", 0).unwrap();
    manager.flush().unwrap();
    assert_eq!(manager.get(b"k").unwrap(), Some(b"v".to_vec()));

    assert!(manager.migrate(b"k", RegionTag::Cold).unwrap());
    assert!(!manager.migrate(b"k", RegionTag::Cold).unwrap());
    assert!(!manager.migrate(b"missing", RegionTag::Hot).unwrap());

    let meta = manager.object_meta(b"k").unwrap();
    assert_eq!(meta.location.region, RegionTag::Cold);
    assert_eq!(manager.get(b"k").unwrap(), Some(b"v".to_vec()));

    let snap = manager.metrics_snapshot();
    assert_eq!(snap.relocations, 1);
    assert_eq!(snap.demotions, 1);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_close_flushes_and_rejects_operations() {
    let (device, manager) = setup(config());
    manager.put(b"k", b"v", 0).unwrap();
    manager.close().unwrap();

    assert_eq!(device.write_log(), vec![0]);
    assert!(matches!(manager.get(b"k"), Err(BlitzError::Closed)));
    assert!(matches!(manager.put(b"k", b"v", 0), Err(BlitzError::Closed)));
    assert!(manager.quiesce().is_err());
    manager.close().unwrap();
}

#[test]
fn test_geometry_mismatch_is_rejected() {
    let config = config();
    let device = Arc::new(MemDevice::new(Geometry::new(4096, 16, 2)));
    let result = StorageManager::open(
        config,
        device,
        Arc::new(MemIndex::new()),
        Arc::new(ManualClock::new(0)),
    );
    assert!(matches!(result, Err(BlitzError::Config(_))));
}
