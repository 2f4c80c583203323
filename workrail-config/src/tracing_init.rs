// workrail-config/src/tracing_init.rs
// ============================================================================
// Module: Tracing Bootstrap
// Description: Installs the process-wide tracing subscriber.
// Purpose: Give any binary embedding the engine one call to wire up structured logs.
// Dependencies: tracing, tracing-subscriber
// ============================================================================

//! ## Overview
//! A span per tool call, structured fields for `sessionId`/`runId`, no
//! payload bodies logged — the engine itself never calls into `tracing`
//! directly (§9 Ambient Stack — logging); this is purely for an embedding
//! binary's operational diagnostics. The filter directive defaults to
//! `info` and honors `RUST_LOG` if set, matching `tracing-subscriber`'s
//! usual convention.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Installs a global `tracing` subscriber writing structured logs to
/// stderr. Safe to call at most once per process; a second call is a no-op
/// rather than a panic.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic_when_called_twice() {
        init_tracing();
        init_tracing();
    }
}
