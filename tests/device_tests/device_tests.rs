//! Tests for device I/O
//!
//! These tests verify:
//! - Transient failures are retried with exponential, capped backoff
//! - Exhausted retries and non-transient errors surface as Device errors
//! - Permanent faults surface as DeviceFault and are never retried
//! - Slow writes are treated as timed out
//! - The file-backed device round-trips pages and erases blocks
//! - Concurrent transfers to distinct pages of a file device do not interfere

use std::sync::Arc;
use std::time::Duration;

use blitzkv::config::IoPolicy;
use blitzkv::device::{BlockDevice, DeviceError, DeviceIo, FileDevice, Geometry, MemDevice};
use blitzkv::metrics::{Counter, Metrics};
use blitzkv::BlitzError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn policy() -> IoPolicy {
    IoPolicy {
        max_retries: 3,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        timeout: Duration::from_secs(5),
    }
}

fn setup(policy: IoPolicy) -> (Arc<MemDevice>, DeviceIo, Arc<Metrics>) {
    let device = Arc::new(MemDevice::new(Geometry::new(4096, 16, 2)));
    let metrics = Arc::new(Metrics::new().unwrap());
    let io = DeviceIo::new(device.clone(), policy, Arc::clone(&metrics));
    (device, io, metrics)
}

// =============================================================================
// Retry Tests
// =============================================================================

#[test]
fn test_backoff_doubles_and_caps() {
    let (_, io, _) = setup(policy());
    assert_eq!(io.backoff(0), Duration::from_millis(1));
    assert_eq!(io.backoff(1), Duration::from_millis(2));
    assert_eq!(io.backoff(2), Duration::from_millis(4));
    assert_eq!(io.backoff(3), Duration::from_millis(4));
    assert_eq!(io.backoff(40), Duration::from_millis(4));
}

#[test]
fn test_transient_write_failures_are_retried() {
    let (device, io, metrics) = setup(policy());
    device.fail_next_writes(2);

    io.write_page(3, &[9u8; 4096]).unwrap();
    assert_eq!(metrics.get(Counter::Retries), 2);
    assert_eq!(device.read_page(3).unwrap(), vec![9u8; 4096]);
    assert_eq!(device.write_log(), vec![3]);
}

#[test]
fn test_transient_read_failures_are_retried() {
    let (device, io, metrics) = setup(policy());
    device.fail_next_reads(3);
    assert_eq!(io.read_page(0).unwrap().len(), 4096);
    assert_eq!(metrics.get(Counter::Retries), 3);
}

#[test]
fn test_retry_budget_exhausted() {
    let (device, io, metrics) = setup(policy());
    device.fail_next_writes(10);

    match io.write_page(0, &[0u8; 4096]) {
        Err(BlitzError::Device { op, source }) => {
            assert_eq!(op, "write");
            assert!(source.is_transient());
        }
        other => panic!("expected Device error, got {:?}", other),
    }
    // First attempt plus three retries
    assert_eq!(metrics.get(Counter::Retries), 3);
    assert!(device.write_log().is_empty());
}

#[test]
fn test_misaligned_write_is_not_retried() {
    let (_, io, metrics) = setup(policy());
    let err = io.write_page(0, &[0u8; 100]).unwrap_err();
    assert!(matches!(
        err,
        BlitzError::Device {
            source: DeviceError::Misaligned { .. },
            ..
        }
    ));
    assert_eq!(metrics.get(Counter::Retries), 0);
}

#[test]
fn test_permanent_fault_is_fatal() {
    let (device, io, metrics) = setup(policy());
    device.set_permanent_fault(true);

    let err = io.read_page(0).unwrap_err();
    assert!(matches!(err, BlitzError::DeviceFault(_)));
    assert!(err.is_fatal());
    assert_eq!(metrics.get(Counter::Retries), 0);
}

#[test]
fn test_slow_write_times_out() {
    let mut p = policy();
    p.timeout = Duration::from_millis(1);
    p.max_retries = 1;
    let (device, io, metrics) = setup(p);
    device.set_write_delay(Some(Duration::from_millis(20)));

    let err = io.write_page(0, &[1u8; 4096]).unwrap_err();
    assert!(matches!(
        err,
        BlitzError::Device {
            source: DeviceError::TimedOut(_),
            ..
        }
    ));
    assert_eq!(metrics.get(Counter::Retries), 1);

    device.set_write_delay(None);
    io.write_page(0, &[1u8; 4096]).unwrap();
}

#[test]
fn test_spans_and_erase() {
    let (device, io, metrics) = setup(policy());
    let image: Vec<u8> = (0..3 * 4096).map(|i| (i / 4096) as u8).collect();
    io.write_span(16, &image).unwrap();
    assert_eq!(device.write_log(), vec![16, 17, 18]);
    assert_eq!(io.read_span(16, 3).unwrap(), image);

    io.erase(1).unwrap();
    assert_eq!(io.read_page(17).unwrap(), vec![0xFF; 4096]);
    assert_eq!(metrics.get(Counter::Erases), 1);
    assert_eq!(device.erase_log(), vec![1]);

    let snapshot = metrics.snapshot(Default::default());
    assert_eq!(snapshot.writes, 3);
    assert_eq!(snapshot.write_bytes, 3 * 4096);
}

// =============================================================================
// FileDevice Tests
// =============================================================================

#[test]
fn test_file_device_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("blitzkv.dev");
    let device = FileDevice::format(&path, Geometry::new(4096, 16, 2)).unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 16 * 4096);
    assert_eq!(device.path(), path.as_path());

    device.write_page(20, &[0xABu8; 4096]).unwrap();
    device.sync().unwrap();
    assert_eq!(device.read_page(20).unwrap(), vec![0xABu8; 4096]);

    device.erase_block(1).unwrap();
    assert_eq!(device.read_page(20).unwrap(), vec![0xFFu8; 4096]);
}

#[test]
fn test_file_device_bounds() {
    let temp_dir = TempDir::new().unwrap();
    let device = FileDevice::format(temp_dir.path().join("dev"), Geometry::new(4096, 16, 1)).unwrap();

    assert!(matches!(device.read_page(16), Err(DeviceError::OutOfRange(16))));
    assert!(matches!(device.erase_block(1), Err(DeviceError::OutOfRange(1))));
    assert!(matches!(
        device.write_page(0, &[0u8; 10]),
        Err(DeviceError::Misaligned { len: 10, .. })
    ));
}

#[test]
fn test_file_device_concurrent_pages() {
    let temp_dir = TempDir::new().unwrap();
    let device = Arc::new(FileDevice::format(temp_dir.path().join("dev"), Geometry::new(4096, 16, 4)).unwrap());

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let device = Arc::clone(&device);
            std::thread::spawn(move || {
                for i in 0..16u64 {
                    let lba = t * 16 + i;
                    let fill = (lba % 251) as u8;
                    device.write_page(lba, &[fill; 4096]).unwrap();
                    assert_eq!(device.read_page(lba).unwrap(), vec![fill; 4096]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for lba in 0..64u64 {
        assert_eq!(device.read_page(lba).unwrap(), vec![(lba % 251) as u8; 4096]);
    }
}
