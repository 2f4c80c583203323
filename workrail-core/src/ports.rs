// workrail-core/src/ports.rs
// ============================================================================
// Module: WorkRail Capability Ports
// Description: Trait-based boundary between pure domain logic and platform I/O.
// Purpose: Let adapters be injected at the composition root; keep the engine pure.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Mirrors the teacher's `EvidenceProvider`/`Dispatcher`/`RunStateStore`
//! capability-trait boundary (`decision-gate-core/src/interfaces/mod.rs`):
//! the engine and projections depend only on these traits, never on
//! `std::fs` or `std::time` directly. Concrete adapters live in
//! `workrail-store-fs`.
//!
//! Of the seven capabilities named in the design ([`FileSystem`], [`Clock`],
//! [`IdFactory`], and [`KeyringStore`] below), the remaining three —
//! `Sha256`, `Hmac`, `Bech32m` — are realized as the pure functions in
//! [`crate::core::canonical`] and [`crate::core::keyring`] rather than as
//! injectable traits: they carry no external state to substitute at a test
//! boundary, unlike a filesystem, a clock, or a key file. See `DESIGN.md`.
//!
//! The durable components the design calls out as depending on the
//! filesystem port — the session event log, the session lock, the
//! execution session gate, and the two content-addressed stores — are
//! themselves exposed here as capability traits ([`SessionEventLogStore`],
//! [`SessionLock`], [`ExecutionSessionGate`], [`SnapshotStore`],
//! [`PinnedWorkflowStore`]) rather than concrete types, so the engine in
//! [`crate::core::engine`] depends on them the same way it depends on
//! [`FileSystem`]. Their local-filesystem implementations live in
//! `workrail-store-fs`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::events::DomainEvent;
use crate::core::identifiers::AttemptId;
use crate::core::identifiers::EventId;
use crate::core::identifiers::GapId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutputId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::SnapshotRef;
use crate::core::identifiers::WorkflowHash;
use crate::core::identifiers::WorkflowId;
use crate::core::keyring::Keyring;
use crate::core::model::ExecutionSnapshot;
use crate::core::time::Timestamp;
use crate::core::workflow::PinnedWorkflow;

// ============================================================================
// SECTION: Filesystem
// ============================================================================

/// Errors raised by a [`FileSystem`] adapter. Deliberately coarse: the
/// session event-log store classifies these further into its own closed
/// error set (§4.3's `SESSION_STORE_IO_ERROR`, etc.).
#[derive(Debug, Error)]
pub enum FsError {
    /// The requested path does not exist.
    #[error("not found: {0}")]
    NotFound(PathBuf),
    /// Exclusive-create failed because the path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),
    /// An underlying I/O error occurred.
    #[error("io error on {path}: {source}")]
    Io {
        /// The path the operation was attempted against.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// `fsync` reported that durability could not be guaranteed. Per §4.3
    /// this is always a hard error; durability is never relaxed.
    #[error("fsync unsupported on {0}")]
    FsyncUnsupported(PathBuf),
}

/// The only I/O port in WorkRail (§2): every durable component — the event
/// log, the CAS stores, the session lock, the keyring file — depends on
/// this trait rather than on `std::fs` directly.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::NotFound`] or [`FsError::Io`].
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Writes `contents` to a new temp file at `path`, truncating if it
    /// already exists, then `fsync`s and closes it. Does not rename.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`] or [`FsError::FsyncUnsupported`].
    fn write_new_fsynced(&self, path: &Path, contents: &[u8]) -> Result<(), FsError>;

    /// Atomically renames `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`].
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// `fsync`s the directory containing `path`, to durably commit a rename
    /// or file creation within it.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::FsyncUnsupported`] or [`FsError::Io`].
    fn fsync_dir_of(&self, path: &Path) -> Result<(), FsError>;

    /// Creates `path` and all missing parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`].
    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Creates `path` exclusively, failing if it already exists. Used for
    /// the session lock file.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::AlreadyExists`] or [`FsError::Io`].
    fn create_new(&self, path: &Path, contents: &[u8]) -> Result<(), FsError>;

    /// Removes `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`].
    fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    /// Returns `true` if `path` exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries directly under `path`, or an empty list if the
    /// directory does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`].
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, FsError>;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Supplies wall-clock timestamps to the composition root. The engine itself
/// never calls this directly; callers stamp events before they reach
/// projections, which remain pure.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

// ============================================================================
// SECTION: IdFactory
// ============================================================================

/// Mints fresh random-backed identifiers. Centralized so tests can supply a
/// deterministic sequence instead of real randomness.
pub trait IdFactory: Send + Sync {
    /// Mints a fresh [`SessionId`].
    fn new_session_id(&self) -> SessionId;
    /// Mints a fresh [`RunId`].
    fn new_run_id(&self) -> RunId;
    /// Mints a fresh [`NodeId`].
    fn new_node_id(&self) -> NodeId;
    /// Mints a fresh [`AttemptId`].
    fn new_attempt_id(&self) -> AttemptId;
    /// Mints a fresh [`EventId`].
    fn new_event_id(&self) -> EventId;
    /// Mints a fresh [`OutputId`].
    fn new_output_id(&self) -> OutputId;
    /// Mints a fresh [`GapId`].
    fn new_gap_id(&self) -> GapId;
}

// ============================================================================
// SECTION: KeyringStore
// ============================================================================

/// Errors raised loading or persisting the keyring file.
#[derive(Debug, Error)]
pub enum KeyringStoreError {
    /// The underlying filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// The keyring file's contents were not valid.
    #[error("keyring file is invalid: {0}")]
    Invalid(String),
}

/// Owns the keyring's on-disk lifecycle (§9: "the keyring is the only
/// legitimately global mutable state"). `loadOrCreate` and `rotate` are
/// explicit, never implicit.
pub trait KeyringStore: Send + Sync {
    /// Loads the keyring file, creating one with a freshly generated key if
    /// none exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringStoreError`] if the existing file is invalid.
    fn load_or_create(&self) -> Result<Keyring, KeyringStoreError>;

    /// Persists a rotated keyring, replacing the on-disk file.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringStoreError`] if the write fails.
    fn save(&self, keyring: &Keyring) -> Result<(), KeyringStoreError>;
}

// ============================================================================
// SECTION: Session Event-Log Store
// ============================================================================

/// The closed failure model for the session event-log store (§4.3).
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// Another writer already holds the session lock.
    #[error("SESSION_STORE_LOCK_BUSY: retry after {retry_after_ms}ms")]
    LockBusy {
        /// Hint for how long to wait before retrying.
        retry_after_ms: u64,
    },
    /// An underlying filesystem operation failed.
    #[error("SESSION_STORE_IO_ERROR: {0}")]
    Io(#[from] FsError),
    /// Corruption was detected while loading the session.
    #[error("SESSION_STORE_CORRUPTION_DETECTED: {location} ({reason})")]
    CorruptionDetected {
        /// Where the corruption was found.
        location: CorruptionLocation,
        /// The closed-set reason.
        reason: CorruptionReason,
    },
    /// An append plan violated an append-time invariant (e.g. partial dedupe overlap).
    #[error("SESSION_STORE_INVARIANT_VIOLATION: {0}")]
    InvariantViolation(String),
}

/// Where corruption was detected in a session's event log (§3.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionLocation {
    /// The most recently written segment.
    Tail,
    /// An earlier segment.
    Head,
}

/// The closed set of corruption reasons (§3.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionReason {
    /// A segment's computed digest disagreed with its manifest-recorded digest.
    DigestMismatch,
    /// `eventIndex` values were not contiguous.
    NonContiguousIndices,
    /// A manifest-attested segment file is missing from disk.
    MissingAttestedSegment,
    /// The log declares a schema version this build does not understand.
    UnknownSchemaVersion,
    /// An event failed closed-set schema validation.
    SchemaValidationFailed,
}

/// A pin binding a snapshot to the event that produced it (§4.3, §9 Open Question (a)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPin {
    /// The pinned snapshot's content-addressed ref.
    pub snapshot_ref: SnapshotRef,
    /// The `eventIndex` the pin is associated with.
    pub event_index: u64,
    /// The event whose processing produced this pin.
    pub created_by_event_id: EventId,
}

/// One atomic unit of durable change: `{events, snapshotPins}` (§4.3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppendPlan {
    /// Events to append, in the fixed order described in §4.7.9.
    pub events: Vec<DomainEvent>,
    /// Snapshot pins to record after the segment closes.
    pub snapshot_pins: Vec<SnapshotPin>,
}

/// Either the full log validated cleanly, or the longest validated prefix
/// plus why the tail was rejected (§4.3 `loadValidatedPrefix`).
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedSession {
    /// The full log validated cleanly.
    Valid {
        /// Events in ascending `eventIndex` order.
        events: Vec<DomainEvent>,
    },
    /// Only a prefix validated; the tail was truncated.
    Truncated {
        /// The validated prefix, in ascending `eventIndex` order.
        events: Vec<DomainEvent>,
        /// Why the tail was rejected.
        tail_reason: CorruptionReason,
    },
}

/// A non-forgeable witness that the session lock is held and the session's
/// log is healthy (§4.5, §9 "Witnesses"). Constructible only by an
/// [`ExecutionSessionGate`] implementation.
#[derive(Debug)]
pub struct HealthyLock {
    session_id: SessionId,
}

impl HealthyLock {
    /// Constructs the witness. Restricted to gate implementations in
    /// `workrail-store-fs`; domain code never calls this directly.
    #[must_use]
    pub const fn new_for_gate(session_id: SessionId) -> Self {
        Self { session_id }
    }

    /// The session this witness attests to.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Append-only storage for one session's domain event log (§4.3).
pub trait SessionEventLogStore: Send + Sync {
    /// Loads the full log, failing if any segment does not validate.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`].
    fn load(&self, session_id: &SessionId) -> Result<LoadedSession, SessionStoreError>;

    /// Loads the longest validated prefix, never failing on tail corruption.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`] only for I/O failures, never for corruption.
    fn load_validated_prefix(&self, session_id: &SessionId) -> Result<LoadedSession, SessionStoreError>;

    /// Appends `plan` atomically under `lock`. Idempotent on `dedupeKey`
    /// overlap: if every event in the plan is already present, this is a
    /// no-op; partial overlap fails [`SessionStoreError::InvariantViolation`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError`].
    fn append(&self, lock: &HealthyLock, plan: &AppendPlan) -> Result<(), SessionStoreError>;
}

// ============================================================================
// SECTION: Session Lock & Execution Session Gate
// ============================================================================

/// An acquired, exclusive session lock. Dropping it releases the lock on
/// every exit path (§4.5).
pub trait SessionLockGuard: Send {
    /// The session this lock guards.
    fn session_id(&self) -> &SessionId;
}

/// Exclusive single-writer lock acquisition (§4.5).
pub trait SessionLock: Send + Sync {
    /// Acquires the lock, failing fast rather than breaking a stale lock.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::LockBusy`] if another writer holds it.
    fn acquire(&self, session_id: &SessionId) -> Result<Box<dyn SessionLockGuard>, SessionStoreError>;
}

/// Combines lock acquisition with a health check to produce a [`HealthyLock`]
/// witness (§4.5). `append` requires this witness; it cannot be forged
/// outside this trait's implementation.
pub trait ExecutionSessionGate: Send + Sync {
    /// Acquires the session lock and checks health, returning a witness only
    /// when the session is `healthy`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::LockBusy`] if the lock is held, or
    /// [`SessionStoreError::CorruptionDetected`] if health is not `healthy`.
    fn acquire_healthy(&self, session_id: &SessionId) -> Result<HealthyLock, SessionStoreError>;
}

// ============================================================================
// SECTION: Snapshot Store & Pinned-Workflow Store
// ============================================================================

/// Errors raised by a content-addressed store (§4.4).
#[derive(Debug, Error)]
pub enum CasStoreError {
    /// An underlying filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// The loaded bytes failed canonicalization, hashed to a different ref,
    /// or failed schema validation.
    #[error("CAS_STORE_CORRUPTION_DETECTED: {0}")]
    CorruptionDetected(String),
}

/// Content-addressed store of execution snapshots, keyed by [`SnapshotRef`] (§4.4).
pub trait SnapshotStore: Send + Sync {
    /// Canonicalizes and hashes `snapshot`, writing it if not already present.
    /// Idempotent: writing identical content twice yields the same ref and
    /// does not duplicate storage.
    ///
    /// # Errors
    ///
    /// Returns [`CasStoreError`].
    fn put(&self, snapshot: &ExecutionSnapshot) -> Result<SnapshotRef, CasStoreError>;

    /// Loads the snapshot at `snapshot_ref`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CasStoreError::CorruptionDetected`] on schema or hash mismatch.
    fn get(&self, snapshot_ref: &SnapshotRef) -> Result<Option<ExecutionSnapshot>, CasStoreError>;
}

/// Content-addressed store of compiled workflow definitions, keyed by
/// [`WorkflowHash`] (§4.4).
pub trait PinnedWorkflowStore: Send + Sync {
    /// Canonicalizes and hashes `workflow`, writing it if not already present.
    ///
    /// # Errors
    ///
    /// Returns [`CasStoreError`].
    fn put(&self, workflow: &PinnedWorkflow) -> Result<WorkflowHash, CasStoreError>;

    /// Loads the workflow at `workflow_hash`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CasStoreError::CorruptionDetected`] on schema or hash mismatch.
    fn get(&self, workflow_hash: &WorkflowHash) -> Result<Option<PinnedWorkflow>, CasStoreError>;
}

// ============================================================================
// SECTION: Workflow Registry
// ============================================================================

/// A browsable summary of one registered workflow (§6 `list_workflows`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSummary {
    /// The workflow's caller-facing id.
    pub workflow_id: WorkflowId,
    /// The content-addressed hash of its currently-pinned definition.
    pub workflow_hash: WorkflowHash,
    /// Number of steps the pinned definition declares.
    pub step_count: usize,
}

/// Maps caller-facing [`WorkflowId`]s onto the currently-pinned
/// [`WorkflowHash`] backing them, and enumerates what is registered (§6
/// `list_workflows`/`inspect_workflow`). Distinct from [`PinnedWorkflowStore`],
/// which is keyed by content hash and knows nothing about workflow ids;
/// workflow authoring and registration are themselves out of scope (§1).
pub trait WorkflowRegistry: Send + Sync {
    /// Enumerates every registered workflow.
    ///
    /// # Errors
    ///
    /// Returns [`CasStoreError`].
    fn list(&self) -> Result<Vec<WorkflowSummary>, CasStoreError>;

    /// Resolves `workflow_id` to its currently-pinned [`WorkflowHash`], or
    /// `None` if the id is not registered.
    ///
    /// # Errors
    ///
    /// Returns [`CasStoreError`].
    fn resolve(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowHash>, CasStoreError>;
}
