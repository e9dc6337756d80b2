//! Tests for the migration state machine
//!
//! These tests verify:
//! - Observing → HotCandidate only on a burst inside one rate bucket
//! - Candidates are classified only after the observation window
//! - Hot is never reached without passing through HotCandidate
//! - Sweep demotes idle Hot objects and promotes re-heated Cold ones
//! - Only settled objects report a target region

use std::time::Duration;

use blitzkv::config::HotnessPolicy;
use blitzkv::hotness::{HotnessTracker, MigrationState, Transition};
use blitzkv::index::{KeyIndex, Location, MemIndex, ObjectMeta};
use blitzkv::page::RegionTag;

// =============================================================================
// Helper Functions
// =============================================================================

fn tracker() -> HotnessTracker {
    HotnessTracker::new(HotnessPolicy::default(), 4)
}

fn location() -> Location {
    Location {
        page_id: 1,
        lba: 0,
        region: RegionTag::NewGen,
        slot: 0,
    }
}

/// Metadata as the storage core would hold it before an access at `now`
fn meta_before(access_count: u64, last_access: u64) -> ObjectMeta {
    let mut meta = ObjectMeta::new(b"k".to_vec(), location(), 0, 0, 8);
    meta.access_count = access_count;
    meta.last_access = last_access;
    meta
}

/// Drive `key` with one access every `step_ms` from `start` for `count`
/// accesses, returning every transition emitted and the final time
fn drive(t: &HotnessTracker, key: &[u8], start: u64, step_ms: u64, count: u64) -> (Vec<Transition>, u64) {
    let mut transitions = Vec::new();
    let mut now = start;
    for i in 0..count {
        let prev = now;
        now += step_ms;
        if let Some(tr) = t.on_access(key, &meta_before(i + 1, prev), now) {
            transitions.push(tr);
        }
    }
    (transitions, now)
}

// =============================================================================
// Observation Tests
// =============================================================================

#[test]
fn test_new_object_starts_observing() {
    let t = tracker();
    t.observe_new(b"k", 0);
    assert_eq!(t.state(b"k"), Some(MigrationState::Observing));
    assert_eq!(t.len(), 1);
}

#[test]
fn test_slow_accesses_stay_observing() {
    let t = tracker();
    t.observe_new(b"k", 0);
    let (transitions, _) = drive(&t, b"k", 0, 600, 50);
    assert!(transitions.is_empty());
    assert_eq!(t.state(b"k"), Some(MigrationState::Observing));
}

#[test]
fn test_burst_makes_candidate() {
    let t = tracker();
    t.observe_new(b"k", 0);
    let (transitions, _) = drive(&t, b"k", 0, 100, 3);
    assert_eq!(
        transitions,
        vec![Transition {
            from: MigrationState::Observing,
            to: MigrationState::HotCandidate,
        }]
    );
    assert_eq!(t.state(b"k"), Some(MigrationState::HotCandidate));
}

#[test]
fn test_candidate_waits_for_window() {
    let t = tracker();
    t.observe_new(b"k", 0);
    drive(&t, b"k", 0, 100, 3);

    // 9.9s into a 10s window
    let (transitions, _) = drive(&t, b"k", 300, 100, 99);
    assert!(transitions.is_empty());
    assert_eq!(t.state(b"k"), Some(MigrationState::HotCandidate));
}

#[test]
fn test_sustained_candidate_becomes_hot() {
    let t = tracker();
    t.observe_new(b"k", 0);
    let (_, now) = drive(&t, b"k", 0, 100, 3);
    let (transitions, _) = drive(&t, b"k", now, 100, 100);

    assert_eq!(
        transitions,
        vec![Transition {
            from: MigrationState::HotCandidate,
            to: MigrationState::Hot,
        }]
    );
    assert_eq!(transitions[0].relocation(), Some(RegionTag::Hot));
}

#[test]
fn test_unsustained_candidate_becomes_cold() {
    let t = tracker();
    t.observe_new(b"k", 0);
    let (_, now) = drive(&t, b"k", 0, 100, 3);

    // One access after the window: rate far below the candidate rate
    let later = now + Duration::from_secs(11).as_millis() as u64;
    let tr = t.on_access(b"k", &meta_before(4, now), later).unwrap();
    assert_eq!(tr.to, MigrationState::Cold);
    assert_eq!(tr.relocation(), Some(RegionTag::Cold));
}

#[test]
fn test_placements_cover_settled_objects_only() {
    let t = tracker();
    t.observe_new(b"idle", 0);
    t.observe_new(b"burst", 0);
    t.observe_new(b"busy", 0);
    t.observe_new(b"fading", 0);

    drive(&t, b"burst", 0, 100, 3);
    let (_, now) = drive(&t, b"busy", 0, 100, 3);
    drive(&t, b"busy", now, 100, 100);
    let (_, now) = drive(&t, b"fading", 0, 100, 3);
    t.on_access(b"fading", &meta_before(4, now), now + 11_000);

    let mut placements = t.placements();
    placements.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        placements,
        vec![
            (b"busy".to_vec(), RegionTag::Hot),
            (b"fading".to_vec(), RegionTag::Cold),
        ]
    );
}

#[test]
fn test_hot_is_only_reached_through_candidate() {
    let t = tracker();
    for k in 0..20u8 {
        let key = [k];
        t.observe_new(&key, 0);
        let step = 50 + k as u64 * 40;
        let (transitions, _) = drive(&t, &key, 0, step, 400);
        let mut state = MigrationState::Observing;
        for tr in transitions {
            assert_eq!(tr.from, state);
            if tr.to == MigrationState::Hot {
                assert_eq!(tr.from, MigrationState::HotCandidate);
            }
            state = tr.to;
        }
        assert_eq!(t.state(&key), Some(state));
    }
}

#[test]
fn test_forget_drops_state() {
    let t = tracker();
    t.observe_new(b"k", 0);
    t.forget(b"k");
    assert_eq!(t.state(b"k"), None);
    assert!(t.is_empty());
}

// =============================================================================
// Sweep Tests
// =============================================================================

fn make_hot(t: &HotnessTracker, key: &[u8]) -> u64 {
    t.observe_new(key, 0);
    let (_, now) = drive(t, key, 0, 100, 3);
    let (_, now) = drive(t, key, now, 100, 100);
    assert_eq!(t.state(key), Some(MigrationState::Hot));
    now
}

#[test]
fn test_sweep_demotes_idle_hot_object() {
    let t = tracker();
    let index = MemIndex::new();
    let now = make_hot(&t, b"k");

    let mut meta = ObjectMeta::new(b"k".to_vec(), location(), 0, 0, 8);
    meta.access_count = 100;
    meta.last_access = now;
    index.insert(meta);

    // Still warm: sqrt(100) / 1s = 10
    assert!(t.sweep(&index, now + 1_000).is_empty());

    // Idle for 60s: 10 / 60 < 2
    let changed = t.sweep(&index, now + 60_000);
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].1.to, MigrationState::Cold);
    assert_eq!(t.state(b"k"), Some(MigrationState::Cold));

    let scored = index.lookup(b"k").unwrap().hotness;
    assert!(scored > 0.0 && scored < 2.0);
}

#[test]
fn test_sweep_promotes_reheated_cold_object() {
    let t = tracker();
    let index = MemIndex::new();
    let now = make_hot(&t, b"k");

    let mut meta = ObjectMeta::new(b"k".to_vec(), location(), 0, 0, 8);
    meta.access_count = 100;
    meta.last_access = now;
    index.insert(meta);
    t.sweep(&index, now + 60_000);
    assert_eq!(t.state(b"k"), Some(MigrationState::Cold));

    index.update(b"k", &mut |m| {
        m.access_count = 400;
        m.last_access = now + 61_000;
    });
    let changed = t.sweep(&index, now + 62_000);
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].1.to, MigrationState::Hot);
}

#[test]
fn test_sweep_drops_keys_missing_from_index() {
    let t = tracker();
    let index = MemIndex::new();
    make_hot(&t, b"gone");

    assert!(t.sweep(&index, 100_000).is_empty());
    assert_eq!(t.state(b"gone"), None);
}

#[test]
fn test_state_counts() {
    let t = tracker();
    t.observe_new(b"a", 0);
    t.observe_new(b"b", 0);
    make_hot(&t, b"c");
    assert_eq!(t.state_counts(), [2, 0, 1, 0]);
}
