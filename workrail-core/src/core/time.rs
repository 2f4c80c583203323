// workrail-core/src/core/time.rs
// ============================================================================
// Module: WorkRail Time Model
// Description: Canonical timestamp representation for events and snapshots.
// Purpose: Keep projections deterministic by never reading wall-clock time.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The core never reads wall-clock time directly; timestamps are supplied by
//! the [`crate::ports::Clock`] capability at the composition root and carried
//! explicitly through events and snapshots so that replay is byte-exact.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Unix epoch milliseconds, carried explicitly on every event.
///
/// # Invariants
/// - No validation is performed; monotonicity across events in one session
///   is a property of the caller's [`crate::ports::Clock`], not enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}
