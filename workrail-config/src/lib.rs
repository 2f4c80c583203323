// workrail-config/src/lib.rs
// ============================================================================
// Module: WorkRail Config Library
// Description: Layered configuration model plus the tracing bootstrap.
// Purpose: Single source of truth for workrail.toml semantics.
// Dependencies: serde, toml, tracing-subscriber
// ============================================================================

//! ## Overview
//! `workrail-config` defines the configuration surface for an embedding
//! binary: the data root the `workrail-store-fs` adapters are rooted at,
//! the byte/item budgets the engine enforces, the lock retry hint, and the
//! keyring rotation policy. It also owns `init_tracing`, the one call an
//! embedding binary needs to get structured diagnostics.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod tracing_init;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::CONFIG_PATH_ENV_VAR;
pub use config::ConfigError;
pub use config::KeyringRotationPolicy;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::WorkRailConfig;
pub use tracing_init::init_tracing;
