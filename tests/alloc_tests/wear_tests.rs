//! Tests for the wear leveler
//!
//! These tests verify:
//! - `choose_block` returns a block with the minimum erase count
//! - Erase counts grow by exactly one per recorded erase, never otherwise
//! - Allocation through the page allocator spreads erases

use blitzkv::alloc::{PageAllocator, WearLeveler};
use blitzkv::config::PAGES_PER_BLOCK;
use blitzkv::device::Geometry;
use blitzkv::page::RegionTag;

// =============================================================================
// WearLeveler Tests
// =============================================================================

#[test]
fn test_choose_block_returns_minimum() {
    let wear = WearLeveler::new(5);
    for (block, times) in [(0, 3), (1, 1), (2, 4), (3, 1), (4, 2)] {
        for _ in 0..times {
            wear.record_erase(block);
        }
    }
    // Blocks 1 and 3 tie; the lowest id wins
    assert_eq!(wear.choose_block(), Some(1));
    assert_eq!(wear.choose_among([0, 2, 3, 4]), Some(3));
    assert_eq!(wear.choose_among([]), None);
}

#[test]
fn test_record_erase_increments_by_one() {
    let wear = WearLeveler::new(2);
    assert_eq!(wear.record_erase(1), Some(1));
    assert_eq!(wear.record_erase(1), Some(2));
    assert_eq!(wear.erase_count(1), Some(2));
    assert_eq!(wear.erase_count(0), Some(0));

    // Choosing never counts as an erase
    wear.choose_block();
    wear.choose_block();
    assert_eq!(wear.erase_count(0), Some(0));
}

#[test]
fn test_unknown_block() {
    let wear = WearLeveler::new(2);
    assert_eq!(wear.record_erase(9), None);
    assert_eq!(wear.erase_count(9), None);
    assert_eq!(wear.stats().total_erases, 0);
}

#[test]
fn test_stats() {
    let wear = WearLeveler::new(3);
    wear.record_erase(0);
    wear.record_erase(0);
    wear.record_erase(2);
    let stats = wear.stats();
    assert_eq!(stats.blocks, 3);
    assert_eq!(stats.min_erases, 0);
    assert_eq!(stats.max_erases, 2);
    assert_eq!(stats.total_erases, 3);
}

// =============================================================================
// Allocator Integration
// =============================================================================

#[test]
fn test_cold_clusters_rotate_through_least_worn() {
    let geometry = Geometry::new(4096, PAGES_PER_BLOCK, 6);
    let alloc = PageAllocator::new(geometry, 2, 1, 3);

    for _ in 0..30 {
        let lba = alloc.allocate(RegionTag::Cold, 100).unwrap();
        alloc.free(RegionTag::Cold, lba);
        for block in alloc.take_erasable(RegionTag::Cold) {
            alloc.erased(RegionTag::Cold, block);
        }
    }

    // 30 erases over 3 cold blocks, spread evenly
    for block in 3..6 {
        assert_eq!(alloc.wear().erase_count(block), Some(10));
    }
    let stats = alloc.wear().stats();
    assert_eq!(stats.total_erases, 30);
}
