//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations on a file-backed device
//! - TTL expiry through an injected clock
//! - Flush and close
//! - Concurrent access patterns
//! - Metrics snapshot contents

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blitzkv::config::Config;
use blitzkv::engine::Engine;
use blitzkv::{Geometry, ManualClock, MemDevice, MemIndex};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .regions(8, 4, 4)
        .sweep_interval(None)
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

fn setup_manual_engine() -> (Arc<ManualClock>, Engine) {
    let config = Config::builder()
        .regions(8, 4, 4)
        .sweep_interval(None)
        .build();
    let clock = Arc::new(ManualClock::new(1_000_000));
    let device = Arc::new(MemDevice::new(Geometry::from_config(&config)));
    let engine = Engine::open_with(config, device, Arc::new(MemIndex::new()), clock.clone()).unwrap();
    (clock, engine)
}

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[test]
fn test_open_creates_device_file() {
    let (temp_dir, engine) = setup_temp_engine();
    let path = temp_dir.path().join("blitzkv.dev");
    assert!(path.exists());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), engine.total_capacity());
    assert_eq!(engine.data_dir(), temp_dir.path());
}

#[test]
fn test_put_and_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key1", b"value1").unwrap();
    let result = engine.get(b"key1").unwrap();

    assert_eq!(result, Some(b"value1".to_vec()));
}

#[test]
fn test_get_nonexistent() {
    let (_temp, engine) = setup_temp_engine();
    assert_eq!(engine.get(b"nonexistent").unwrap(), None);
}

#[test]
fn test_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key1", b"value1").unwrap();
    assert!(engine.delete(b"key1").unwrap());

    assert_eq!(engine.get(b"key1").unwrap(), None);
    assert!(!engine.delete(b"key1").unwrap());
}

#[test]
fn test_get_after_flush_reads_device_file() {
    let (_temp, engine) = setup_temp_engine();
    for i in 0..200 {
        engine.put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes()).unwrap();
    }
    engine.flush().unwrap();
    assert_eq!(engine.buffered_pages(), 0);

    for i in 0..200 {
        let value = engine.get(format!("key{}", i).as_bytes()).unwrap();
        assert_eq!(value, Some(format!("value{}", i).into_bytes()));
    }
    assert!(engine.metrics_snapshot().reads > 0);
}

#[test]
fn test_keys_are_sorted() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"b", b"2").unwrap();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"c", b"3").unwrap();
    assert_eq!(engine.keys(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(engine.len(), 3);
}

// =============================================================================
// TTL Tests
// =============================================================================

#[test]
fn test_ttl_expiry() {
    let (clock, engine) = setup_manual_engine();
    engine.put_with_ttl(b"session", b"token", Duration::from_secs(2)).unwrap();
    engine.put(b"forever", b"x").unwrap();

    clock.advance(Duration::from_secs(1));
    assert_eq!(engine.get(b"session").unwrap(), Some(b"token".to_vec()));

    clock.advance(Duration::from_secs(2));
    assert_eq!(engine.get(b"session").unwrap(), None);
    assert_eq!(engine.get(b"forever").unwrap(), Some(b"x".to_vec()));
    assert_eq!(engine.len(), 1);
}

#[test]
fn test_overwrite_resets_ttl() {
    let (clock, engine) = setup_manual_engine();
    engine.put_with_ttl(b"k", b"v1", Duration::from_secs(2)).unwrap();
    clock.advance(Duration::from_millis(1_500));
    engine.put_with_ttl(b"k", b"v2", Duration::from_secs(2)).unwrap();
    clock.advance(Duration::from_millis(1_500));
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_close_flushes() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"k", b"v").unwrap();
    assert_eq!(engine.buffered_pages(), 1);
    engine.close().unwrap();
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..250 {
                    let key = format!("t{}-k{}", t, i);
                    engine.put(key.as_bytes(), key.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("t0-k{}", i % 250);
                    if let Some(value) = engine.get(key.as_bytes()).unwrap() {
                        assert_eq!(value, key.into_bytes());
                    }
                }
            })
        })
        .collect();

    for h in writers.into_iter().chain(readers) {
        h.join().unwrap();
    }

    assert_eq!(engine.len(), 1000);
    for t in 0..4 {
        for i in 0..250 {
            let key = format!("t{}-k{}", t, i);
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
        }
    }
}

#[test]
fn test_concurrent_overwrites_of_one_key() {
    let (_temp, engine) = setup_temp_engine();
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..200 {
                    engine.put(b"shared", format!("{}-{}", t, i).as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(engine.len(), 1);
    let value = String::from_utf8(engine.get(b"shared").unwrap().unwrap()).unwrap();
    assert!(value.ends_with("-199"));
}

// =============================================================================
// Metrics Tests
// =============================================================================

#[test]
fn test_metrics_snapshot_counts_operations() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.get(b"a").unwrap();
    engine.delete(b"b").unwrap();
    engine.flush().unwrap();

    let snap = engine.metrics_snapshot();
    assert_eq!(snap.puts, 2);
    assert_eq!(snap.gets, 1);
    assert_eq!(snap.deletes, 1);
    assert_eq!(snap.logical_bytes_written, 4);
    assert_eq!(snap.writes, 1);
    assert!(snap.write_amplification > 1.0);
    assert!(snap.to_string().contains("puts=2"));
}
