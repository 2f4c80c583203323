// workrail-store-fs/src/clock.rs
// ============================================================================
// Module: System Clock Adapter
// Description: Wall-clock implementation of workrail_core::ports::Clock.
// Purpose: Supply real timestamps at the composition root.
// Dependencies: workrail-core, std::time
// ============================================================================

//! ## Overview
//! The engine never reads wall-clock time itself (§4.6); this is the one
//! adapter that does, at the composition root.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use workrail_core::core::time::Timestamp;
use workrail_core::ports::Clock;

/// Supplies the real wall-clock time as unix epoch milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Builds a new system clock adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_returns_a_positive_unix_timestamp() {
        let clock = SystemClock::new();
        assert!(clock.now().as_unix_millis() > 0);
    }
}
