//! Hotness Module
//!
//! Online hot/cold classification of stored objects.
//!
//! ## Responsibilities
//! - Score an object from its access statistics ([`score`])
//! - Drive each object through the migration state machine
//! - Emit relocation decisions; the storage manager carries them out
//!
//! ## State Machine
//! ```text
//!   first write
//!        │
//!        ▼
//!  ┌───────────┐  >3 accesses in 1s  ┌──────────────┐
//!  │ Observing │ ──────────────────▶ │ HotCandidate │
//!  └───────────┘                     └──────┬───────┘
//!                      window elapsed       │
//!               ┌───────────────────────────┴──────────────┐
//!               │ rate sustained and score ≥ threshold     │ otherwise
//!               ▼                                          ▼
//!          ┌─────────┐   score < threshold (sweep)    ┌─────────┐
//!          │   Hot   │ ─────────────────────────────▶ │  Cold   │
//!          │         │ ◀───────────────────────────── │         │
//!          └─────────┘   score ≥ threshold (sweep)    └─────────┘
//! ```
//!
//! Deleting an object discards its state.

mod scorer;
mod tracker;

pub use scorer::{score, score_with, EPSILON};
pub use tracker::{HotnessTracker, MigrationState, Transition};
