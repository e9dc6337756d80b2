//! Migration state machine
//!
//! Per-object observation → classification, sharded by key hash.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::clock::{seconds_between, Timestamp};
use crate::config::HotnessPolicy;
use crate::index::{KeyIndex, ObjectMeta};
use crate::page::RegionTag;

use super::scorer::score_with;

/// Width of the rate bucket used while observing
const RATE_BUCKET_MS: u64 = 1_000;

/// Classification of one object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    /// Initial state, assigned at first write
    Observing,
    /// Elevated access rate seen; waiting out the observation window
    HotCandidate,
    Hot,
    Cold,
}

/// A state change emitted by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: MigrationState,
    pub to: MigrationState,
}

impl Transition {
    /// Region the object must move to, if this transition relocates it
    pub fn relocation(&self) -> Option<RegionTag> {
        match self.to {
            MigrationState::Hot => Some(RegionTag::Hot),
            MigrationState::Cold => Some(RegionTag::Cold),
            MigrationState::Observing | MigrationState::HotCandidate => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Track {
    state: MigrationState,
    /// Observing: start and count of the current rate bucket
    bucket_start: Timestamp,
    bucket_count: u32,
    /// HotCandidate: when the window opened and accesses since
    since: Timestamp,
    window_count: u64,
}

impl Track {
    fn observing(now: Timestamp) -> Self {
        Self {
            state: MigrationState::Observing,
            bucket_start: now,
            bucket_count: 1,
            since: now,
            window_count: 0,
        }
    }
}

/// Tracks migration state for every live object
pub struct HotnessTracker {
    shards: Box<[Mutex<HashMap<Vec<u8>, Track>>]>,
    policy: HotnessPolicy,
}

impl HotnessTracker {
    pub fn new(policy: HotnessPolicy, shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards, policy }
    }

    pub fn policy(&self) -> &HotnessPolicy {
        &self.policy
    }

    fn shard(&self, key: &[u8]) -> &Mutex<HashMap<Vec<u8>, Track>> {
        let idx = crc32fast::hash(key) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Start observing a newly written object (resets any previous history)
    pub fn observe_new(&self, key: &[u8], now: Timestamp) {
        self.shard(key).lock().insert(key.to_vec(), Track::observing(now));
    }

    /// Drop all state for a deleted object
    pub fn forget(&self, key: &[u8]) {
        self.shard(key).lock().remove(key);
    }

    /// Current state of `key`
    pub fn state(&self, key: &[u8]) -> Option<MigrationState> {
        self.shard(key).lock().get(key).map(|t| t.state)
    }

    /// Number of tracked objects
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of objects per state, in `[Observing, HotCandidate, Hot, Cold]` order
    pub fn state_counts(&self) -> [usize; 4] {
        let mut counts = [0usize; 4];
        for shard in self.shards.iter() {
            for track in shard.lock().values() {
                counts[state_index(track.state)] += 1;
            }
        }
        counts
    }

    /// Region every settled (Hot or Cold) object belongs in
    pub fn placements(&self) -> Vec<(Vec<u8>, RegionTag)> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            out.extend(shard.lock().iter().filter_map(|(key, track)| {
                let target = match track.state {
                    MigrationState::Hot => RegionTag::Hot,
                    MigrationState::Cold => RegionTag::Cold,
                    MigrationState::Observing | MigrationState::HotCandidate => return None,
                };
                Some((key.clone(), target))
            }));
        }
        out
    }

    /// Record one access.
    ///
    /// `meta` is the object's metadata as it stood before this access, so the
    /// score reflects the gap since the previous access.
    pub fn on_access(&self, key: &[u8], meta: &ObjectMeta, now: Timestamp) -> Option<Transition> {
        let mut shard = self.shard(key).lock();
        let track = shard
            .entry(key.to_vec())
            .or_insert_with(|| Track::observing(now));

        match track.state {
            MigrationState::Observing => {
                if now.saturating_sub(track.bucket_start) >= RATE_BUCKET_MS {
                    track.bucket_start = now;
                    track.bucket_count = 0;
                }
                track.bucket_count += 1;

                if track.bucket_count as f32 > self.policy.candidate_rate {
                    track.state = MigrationState::HotCandidate;
                    track.since = now;
                    track.window_count = 0;
                    return Some(Transition {
                        from: MigrationState::Observing,
                        to: MigrationState::HotCandidate,
                    });
                }
                None
            }
            MigrationState::HotCandidate => {
                track.window_count += 1;
                self.classify_candidate(track, meta, now)
            }
            // Hot and Cold are re-scored by the sweep
            MigrationState::Hot | MigrationState::Cold => None,
        }
    }

    /// Re-score every tracked object against the index at `now`.
    ///
    /// Returns the keys whose state changed. Scores are written back into the
    /// index's metadata.
    pub fn sweep(&self, index: &dyn KeyIndex, now: Timestamp) -> Vec<(Vec<u8>, Transition)> {
        let mut changed = Vec::new();

        for shard in self.shards.iter() {
            // Snapshot first so the index is never locked under a tracker shard
            let snapshot: Vec<(Vec<u8>, MigrationState)> = shard
                .lock()
                .iter()
                .filter(|(_, t)| t.state != MigrationState::Observing)
                .map(|(k, t)| (k.clone(), t.state))
                .collect();

            for (key, seen) in snapshot {
                let meta = match index.lookup(&key) {
                    Some(meta) => meta,
                    None => {
                        shard.lock().remove(&key);
                        continue;
                    }
                };

                let s = score_with(&meta, now, self.policy.clamp_penalty);
                index.update(&key, &mut |m| m.hotness = s);

                let mut guard = shard.lock();
                let track = match guard.get_mut(&key) {
                    Some(track) if track.state == seen => track,
                    _ => continue,
                };

                let transition = match track.state {
                    MigrationState::HotCandidate => self.classify_candidate(track, &meta, now),
                    MigrationState::Hot if s < self.policy.promotion_threshold => {
                        track.state = MigrationState::Cold;
                        Some(Transition {
                            from: MigrationState::Hot,
                            to: MigrationState::Cold,
                        })
                    }
                    MigrationState::Cold if s >= self.policy.promotion_threshold => {
                        track.state = MigrationState::Hot;
                        Some(Transition {
                            from: MigrationState::Cold,
                            to: MigrationState::Hot,
                        })
                    }
                    _ => None,
                };

                if let Some(t) = transition {
                    changed.push((key, t));
                }
            }
        }

        changed
    }

    /// Decide a candidate once its observation window has elapsed
    fn classify_candidate(&self, track: &mut Track, meta: &ObjectMeta, now: Timestamp) -> Option<Transition> {
        let window_ms = self.policy.observation_window.as_millis() as u64;
        let elapsed_ms = now.saturating_sub(track.since);
        if elapsed_ms < window_ms {
            return None;
        }

        let elapsed = seconds_between(track.since, now).max(f32::EPSILON);
        let rate = track.window_count as f32 / elapsed;
        let s = score_with(meta, now, self.policy.clamp_penalty);

        let to = if rate > self.policy.candidate_rate && s >= self.policy.promotion_threshold {
            MigrationState::Hot
        } else {
            MigrationState::Cold
        };
        track.state = to;

        Some(Transition {
            from: MigrationState::HotCandidate,
            to,
        })
    }
}

fn state_index(state: MigrationState) -> usize {
    match state {
        MigrationState::Observing => 0,
        MigrationState::HotCandidate => 1,
        MigrationState::Hot => 2,
        MigrationState::Cold => 3,
    }
}
