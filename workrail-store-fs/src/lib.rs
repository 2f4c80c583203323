// workrail-store-fs/src/lib.rs
// ============================================================================
// Module: WorkRail Filesystem Store Library
// Description: Local-disk adapters for every workrail-core capability port.
// Purpose: Compose a working engine over a plain directory tree.
// Dependencies: workrail-core
// ============================================================================

//! ## Overview
//! `workrail-store-fs` is the composition-root half of WorkRail: concrete,
//! `std::fs`-backed implementations of every trait in
//! `workrail_core::ports`. Each adapter is a thin, single-purpose type; none
//! of them know about the advance/block engine, only about the durability
//! ceremony their port demands (crash-safe writes, content addressing,
//! exclusive locking).
//!
//! Layout on disk, rooted at a single `base_dir`:
//! ```text
//! base_dir/
//!   sessions/<sessionId>/segment.<n>.jsonl
//!   sessions/<sessionId>/manifest.jsonl
//!   sessions/<sessionId>/lock
//!   snapshots/<sha256-hex>.json
//!   workflows/<sha256-hex>.json
//!   workflows/registry.json
//!   keys/keyring.json
//! ```

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod cas;
pub mod clock;
pub mod filesystem;
pub mod ids;
pub mod keyring_store;
pub mod lock;
pub mod registry;
pub mod session_log;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cas::FsPinnedWorkflowStore;
pub use cas::FsSnapshotStore;
pub use clock::SystemClock;
pub use filesystem::LocalFileSystem;
pub use ids::RandomIdFactory;
pub use keyring_store::FileKeyringStore;
pub use lock::FsExecutionSessionGate;
pub use lock::FsSessionLock;
pub use registry::FsWorkflowRegistry;
pub use registry::RegistryError;
pub use session_log::FsSessionEventLogStore;
