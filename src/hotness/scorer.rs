//! Hotness Scorer
//!
//! `score = sqrt(access_count) / (ε + idle × (1 + penalty))`
//!
//! - `idle` is seconds since the last access
//! - `penalty = age / ttl` when a TTL is set, else 0
//!
//! Frequency is square-root damped so a handful of extremely hot keys cannot
//! dominate; recency decays the score; the TTL penalty accelerates decay for
//! objects approaching expiry.

use crate::clock::{seconds_between, Timestamp};
use crate::index::ObjectMeta;

/// Guards against division by zero for an object accessed at `now`
pub const EPSILON: f32 = 1e-6;

/// Score `meta` at time `now`, with the aging penalty clamped to [0, 1]
pub fn score(meta: &ObjectMeta, now: Timestamp) -> f32 {
    score_with(meta, now, true)
}

/// Score `meta` at time `now`; `clamp_penalty = false` lets the penalty grow
/// past 1 once an object outlives its TTL
pub fn score_with(meta: &ObjectMeta, now: Timestamp, clamp_penalty: bool) -> f32 {
    if meta.access_count == 0 {
        return 0.0;
    }

    let idle = seconds_between(meta.last_access, now);
    let penalty = aging_penalty(meta, now, clamp_penalty);

    (meta.access_count as f32).sqrt() / (EPSILON + idle * (1.0 + penalty))
}

fn aging_penalty(meta: &ObjectMeta, now: Timestamp, clamp: bool) -> f32 {
    if meta.ttl_ms == 0 {
        return 0.0;
    }
    let age_ms = now.saturating_sub(meta.create_time) as f32;
    let penalty = age_ms / meta.ttl_ms as f32;
    if clamp {
        penalty.clamp(0.0, 1.0)
    } else {
        penalty
    }
}
