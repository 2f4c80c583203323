// workrail-store-fs/src/cas.rs
// ============================================================================
// Module: Filesystem Content-Addressed Stores
// Description: CAS adapters for execution snapshots and pinned workflows (§4.4).
// Purpose: Durable, dedupe-by-content storage keyed by a JCS-canonical digest.
// Dependencies: workrail-core, serde_json
// ============================================================================

//! ## Overview
//! Both [`FsSnapshotStore`] and [`FsPinnedWorkflowStore`] are thin instances
//! of the same shape: canonicalize via JCS, hash to `sha256:<64-hex>`, write
//! `<ref>.json` through the temp-write/fsync/rename/fsync-dir ceremony, and
//! treat a write to an already-present ref as a no-op (content-addressing
//! makes it byte-identical by construction). `get` returns `None` rather than
//! an error for a missing ref, and re-validates the loaded bytes' digest
//! before returning them (§4.4).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use workrail_core::core::canonical::sha256_hex;
use workrail_core::core::canonical::to_canonical_bytes;
use workrail_core::core::identifiers::SnapshotRef;
use workrail_core::core::identifiers::WorkflowHash;
use workrail_core::core::model::ExecutionSnapshot;
use workrail_core::core::workflow::PinnedWorkflow;
use workrail_core::ports::CasStoreError;
use workrail_core::ports::FileSystem;
use workrail_core::ports::PinnedWorkflowStore;
use workrail_core::ports::SnapshotStore;

/// Hashes `value` to its content-addressed ref string (without prefix-typed
/// wrapper), via JCS canonicalization.
fn canonical_ref_hex<T: serde::Serialize>(value: &T) -> Result<(Vec<u8>, String), CasStoreError> {
    let bytes = to_canonical_bytes(value)
        .map_err(|err| CasStoreError::CorruptionDetected(err.to_string()))?;
    let hex = sha256_hex(&bytes);
    Ok((bytes, hex))
}

fn store_path(root: &std::path::Path, hex: &str) -> PathBuf {
    root.join(format!("{hex}.json"))
}

fn tmp_path(path: &std::path::Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn put_bytes(fs: &dyn FileSystem, root: &std::path::Path, hex: &str, bytes: &[u8]) -> Result<(), CasStoreError> {
    fs.create_dir_all(root)?;
    let path = store_path(root, hex);
    if fs.exists(&path) {
        return Ok(());
    }
    let tmp = tmp_path(&path);
    fs.write_new_fsynced(&tmp, bytes)?;
    fs.rename(&tmp, &path)?;
    fs.fsync_dir_of(&path)?;
    Ok(())
}

fn get_bytes(fs: &dyn FileSystem, root: &std::path::Path, hex: &str) -> Result<Option<Vec<u8>>, CasStoreError> {
    let path = store_path(root, hex);
    if !fs.exists(&path) {
        return Ok(None);
    }
    let bytes = fs.read(&path)?;
    if sha256_hex(&bytes) != hex {
        return Err(CasStoreError::CorruptionDetected(format!(
            "stored bytes at {hex} hash to a different digest"
        )));
    }
    Ok(Some(bytes))
}

// ============================================================================
// SECTION: FsSnapshotStore
// ============================================================================

/// Content-addressed store of execution snapshots, rooted at a `snapshots/`
/// directory (§4.4).
pub struct FsSnapshotStore<'a> {
    fs: &'a dyn FileSystem,
    root: PathBuf,
}

impl<'a> FsSnapshotStore<'a> {
    /// Builds a snapshot store rooted at `root`.
    #[must_use]
    pub fn new(fs: &'a dyn FileSystem, root: PathBuf) -> Self {
        Self { fs, root }
    }
}

impl SnapshotStore for FsSnapshotStore<'_> {
    fn put(&self, snapshot: &ExecutionSnapshot) -> Result<SnapshotRef, CasStoreError> {
        let (bytes, hex) = canonical_ref_hex(snapshot)?;
        put_bytes(self.fs, &self.root, &hex, &bytes)?;
        Ok(SnapshotRef::new(format!("sha256:{hex}")))
    }

    fn get(&self, snapshot_ref: &SnapshotRef) -> Result<Option<ExecutionSnapshot>, CasStoreError> {
        let Some(bytes) = get_bytes(self.fs, &self.root, snapshot_ref.hex())? else {
            return Ok(None);
        };
        let snapshot: ExecutionSnapshot = serde_json::from_slice(&bytes)
            .map_err(|err| CasStoreError::CorruptionDetected(err.to_string()))?;
        Ok(Some(snapshot))
    }
}

// ============================================================================
// SECTION: FsPinnedWorkflowStore
// ============================================================================

/// Content-addressed store of compiled workflow definitions, rooted at a
/// `workflows/` directory (§4.4).
pub struct FsPinnedWorkflowStore<'a> {
    fs: &'a dyn FileSystem,
    root: PathBuf,
}

impl<'a> FsPinnedWorkflowStore<'a> {
    /// Builds a pinned-workflow store rooted at `root`.
    #[must_use]
    pub fn new(fs: &'a dyn FileSystem, root: PathBuf) -> Self {
        Self { fs, root }
    }
}

impl PinnedWorkflowStore for FsPinnedWorkflowStore<'_> {
    fn put(&self, workflow: &PinnedWorkflow) -> Result<WorkflowHash, CasStoreError> {
        let (bytes, hex) = canonical_ref_hex(workflow)?;
        put_bytes(self.fs, &self.root, &hex, &bytes)?;
        Ok(WorkflowHash::new(format!("sha256:{hex}")))
    }

    fn get(&self, workflow_hash: &WorkflowHash) -> Result<Option<PinnedWorkflow>, CasStoreError> {
        let Some(bytes) = get_bytes(self.fs, &self.root, workflow_hash.hex())? else {
            return Ok(None);
        };
        let workflow: PinnedWorkflow = serde_json::from_slice(&bytes)
            .map_err(|err| CasStoreError::CorruptionDetected(err.to_string()))?;
        Ok(Some(workflow))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use std::collections::BTreeMap;
    use workrail_core::core::identifiers::NodeId;
    use workrail_core::core::identifiers::StepId;
    use workrail_core::core::identifiers::WorkflowId;
    use workrail_core::core::model::EngineState;

    #[test]
    fn put_then_get_round_trips_a_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSnapshotStore::new(&fs, dir.path().to_path_buf());
        let snapshot = ExecutionSnapshot { node_id: NodeId::new("node_1"), engine_state: EngineState::Init };

        let snapshot_ref = store.put(&snapshot).expect("put");
        let loaded = store.get(&snapshot_ref).expect("get").expect("present");
        assert_eq!(loaded.node_id, snapshot.node_id);
    }

    #[test]
    fn put_is_idempotent_on_identical_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSnapshotStore::new(&fs, dir.path().to_path_buf());
        let snapshot = ExecutionSnapshot { node_id: NodeId::new("node_1"), engine_state: EngineState::Init };

        let first = store.put(&snapshot).expect("first put");
        let second = store.put(&snapshot).expect("second put");
        assert_eq!(first, second);
    }

    #[test]
    fn get_of_a_missing_ref_is_none_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSnapshotStore::new(&fs, dir.path().to_path_buf());
        let missing = SnapshotRef::new(format!("sha256:{}", "0".repeat(64)));
        assert_eq!(store.get(&missing).expect("get"), None);
    }

    #[test]
    fn tampering_with_stored_bytes_is_detected_as_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSnapshotStore::new(&fs, dir.path().to_path_buf());
        let snapshot = ExecutionSnapshot { node_id: NodeId::new("node_1"), engine_state: EngineState::Init };
        let snapshot_ref = store.put(&snapshot).expect("put");

        let path = dir.path().join(format!("{}.json", snapshot_ref.hex()));
        fs.write_new_fsynced(&path, b"{\"tampered\":true}").expect("tamper");

        let err = store.get(&snapshot_ref).unwrap_err();
        assert!(matches!(err, CasStoreError::CorruptionDetected(_)));
    }

    #[test]
    fn put_then_get_round_trips_a_pinned_workflow() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsPinnedWorkflowStore::new(&fs, dir.path().to_path_buf());
        let workflow = PinnedWorkflow {
            workflow_id: WorkflowId::new("wf_a"),
            root_step_id: StepId::new("step_root"),
            steps: BTreeMap::new(),
        };

        let hash = store.put(&workflow).expect("put");
        let loaded = store.get(&hash).expect("get").expect("present");
        assert_eq!(loaded.workflow_id, workflow.workflow_id);
    }
}
