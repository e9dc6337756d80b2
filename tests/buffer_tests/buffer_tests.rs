//! Tests for the active write buffer
//!
//! These tests verify:
//! - The buffer never exceeds its configured size, even under concurrency
//! - Read-your-write: appended entries are visible before any flush
//! - Flush batches pick the least-recently-written pages and seal them
//! - Open write heads stay resident unless nothing else is, or on a drain
//! - Completion, abort and discard semantics

use std::sync::Arc;
use std::thread;

use blitzkv::buffer::{ActiveBuffer, Discard, PutOutcome};
use blitzkv::page::{Entry, Page, RegionTag};

// =============================================================================
// Helper Functions
// =============================================================================

fn page(id: u64) -> Page {
    let mut page = Page::new(id, id * 10, RegionTag::NewGen);
    page.push(Entry::new(format!("key-{}", id), "value"));
    page
}

// =============================================================================
// Capacity Tests
// =============================================================================

#[test]
fn test_full_buffer_returns_page() {
    let buffer = ActiveBuffer::new(2, 2);
    assert!(matches!(buffer.put(page(1)), PutOutcome::Inserted));
    assert!(matches!(buffer.put(page(2)), PutOutcome::Inserted));
    assert!(buffer.is_full());

    match buffer.put(page(3)) {
        PutOutcome::Full(returned) => assert_eq!(returned.id(), 3),
        other => panic!("expected Full, got {:?}", other),
    }
    // Replacing a resident page needs no extra room
    assert!(matches!(buffer.put(page(1)), PutOutcome::Replaced));
    assert_eq!(buffer.len(), 2);
}

#[test]
fn test_capacity_holds_under_concurrency() {
    let buffer = Arc::new(ActiveBuffer::new(32, 8));
    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut inserted = 0;
                for i in 0..100u64 {
                    if let PutOutcome::Inserted = buffer.put(page(t * 1000 + i)) {
                        inserted += 1;
                    }
                    assert!(buffer.len() <= buffer.max_size());
                }
                inserted
            })
        })
        .collect();

    let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(inserted, 32);
    assert_eq!(buffer.len(), 32);
}

// =============================================================================
// Read-Your-Write Tests
// =============================================================================

#[test]
fn test_appended_entry_is_readable() {
    let buffer = ActiveBuffer::new(4, 1);
    buffer.put(page(1));

    let slot = buffer.append(1, Entry::new("second", "v2")).unwrap();
    assert_eq!(slot, 1);

    let entry = buffer.get_entry(1, slot).unwrap();
    assert_eq!(entry.key, b"second".to_vec());
    assert_eq!(entry.value, b"v2".to_vec());
    assert_eq!(buffer.get(1).unwrap().entry_count(), 2);
}

#[test]
fn test_append_to_absent_page_fails() {
    let buffer = ActiveBuffer::new(4, 1);
    assert!(buffer.append(7, Entry::new("k", "v")).is_none());
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_flush_batch_picks_oldest_and_seals() {
    let buffer = ActiveBuffer::new(8, 2);
    for id in 1..=4 {
        buffer.put(page(id));
    }
    // Touch page 1 so it becomes the most recent write
    buffer.append(1, Entry::new("again", "v")).unwrap();

    let batch = buffer.flush_batch(2).unwrap();
    let mut ids: Vec<_> = batch.iter().map(|item| item.page_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3]);
    for item in &batch {
        assert_eq!(item.image.len(), 4096);
        assert_eq!(item.lba, item.page_id * 10);
    }

    // Sealed pages refuse appends but stay readable
    assert!(buffer.append(2, Entry::new("late", "v")).is_none());
    assert!(buffer.get(2).is_some());
    assert_eq!(buffer.discard(2), Discard::Flushing);

    assert_eq!(buffer.complete([2, 3]), 2);
    assert_eq!(buffer.len(), 2);
    assert!(!buffer.contains(2));
}

#[test]
fn test_flush_batch_skips_open_heads() {
    let buffer = ActiveBuffer::new(8, 2);
    // The open head is the oldest write
    buffer.put_open(page(1));
    buffer.put(page(2));
    buffer.put(page(3));

    let batch = buffer.flush_batch(2).unwrap();
    let mut ids: Vec<_> = batch.iter().map(|item| item.page_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(buffer.complete([2, 3]), 2);

    // Still accepting appends
    assert!(buffer.append(1, Entry::new("more", "v")).is_some());

    // Only the head is left, so it goes
    let batch = buffer.flush_batch(2).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].page_id, 1);
}

#[test]
fn test_closed_head_competes_on_recency() {
    let buffer = ActiveBuffer::new(8, 2);
    buffer.put_open(page(1));
    buffer.put(page(2));

    buffer.close(1);
    let batch = buffer.flush_batch(1).unwrap();
    assert_eq!(batch[0].page_id, 1);
}

#[test]
fn test_drain_batch_includes_open_heads() {
    let buffer = ActiveBuffer::new(8, 2);
    buffer.put_open(page(1));
    buffer.put(page(2));
    buffer.put_open(page(3));

    let batch = buffer.drain_batch(2).unwrap();
    let mut ids: Vec<_> = batch.iter().map(|item| item.page_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);

    let batch = buffer.drain_batch(2).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].page_id, 3);
}

#[test]
fn test_abort_returns_pages() {
    let buffer = ActiveBuffer::new(4, 1);
    buffer.put(page(1));
    let batch = buffer.flush_batch(4).unwrap();
    assert_eq!(batch.len(), 1);
    assert!(buffer.flush_batch(4).unwrap().is_empty());

    buffer.abort([1]);
    assert!(buffer.append(1, Entry::new("k2", "v")).is_some());
    assert_eq!(buffer.flush_batch(4).unwrap().len(), 1);
}

#[test]
fn test_discard_resident_page() {
    let buffer = ActiveBuffer::new(4, 1);
    buffer.put(page(1));
    assert_eq!(buffer.discard(1), Discard::Removed);
    assert_eq!(buffer.discard(1), Discard::Absent);
    assert!(buffer.is_empty());
}
