// workrail-store-fs/src/registry.rs
// ============================================================================
// Module: Filesystem Workflow Registry
// Description: Maps caller-facing WorkflowIds onto their pinned WorkflowHash.
// Purpose: Back workrail_core::ports::WorkflowRegistry with a small index file.
// Dependencies: workrail-core, serde_json
// ============================================================================

//! ## Overview
//! Workflow authoring and registration are out of scope for the engine
//! itself (§1); this adapter is the thin index an operator-facing tool
//! writes to and `list_workflows`/`inspect_workflow` read from. It is a
//! single JSON file (`workflows/registry.json`) mapping `WorkflowId` ->
//! `WorkflowHash`, written through the same ceremony as every other durable
//! write in this crate. `step_count` in [`WorkflowSummary`] is resolved by
//! looking the hash up in the backing [`PinnedWorkflowStore`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use workrail_core::core::identifiers::WorkflowHash;
use workrail_core::core::identifiers::WorkflowId;
use workrail_core::ports::CasStoreError;
use workrail_core::ports::FileSystem;
use workrail_core::ports::FsError;
use workrail_core::ports::PinnedWorkflowStore;
use workrail_core::ports::WorkflowRegistry;
use workrail_core::ports::WorkflowSummary;

/// Errors raised while reading or writing the registry index file.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An underlying filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] FsError),
    /// The index file's contents did not parse.
    #[error("workflow registry index is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryIndex {
    #[serde(default)]
    workflows: BTreeMap<String, String>,
}

/// Filesystem-backed [`WorkflowRegistry`], indexed by a single JSON file.
pub struct FsWorkflowRegistry<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
    workflow_store: &'a dyn PinnedWorkflowStore,
}

impl<'a> FsWorkflowRegistry<'a> {
    /// Builds a registry backed by the index file at `path`, resolving step
    /// counts through `workflow_store`.
    #[must_use]
    pub fn new(fs: &'a dyn FileSystem, path: PathBuf, workflow_store: &'a dyn PinnedWorkflowStore) -> Self {
        Self { fs, path, workflow_store }
    }

    fn read_index(&self) -> Result<RegistryIndex, RegistryError> {
        if !self.fs.exists(&self.path) {
            return Ok(RegistryIndex::default());
        }
        let bytes = self.fs.read(&self.path)?;
        serde_json::from_slice(&bytes).map_err(|err| RegistryError::Corrupt(err.to_string()))
    }

    fn write_index(&self, index: &RegistryIndex) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(index).map_err(|err| RegistryError::Corrupt(err.to_string()))?;
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        self.fs.write_new_fsynced(&tmp, &bytes)?;
        self.fs.rename(&tmp, &self.path)?;
        self.fs.fsync_dir_of(&self.path)?;
        Ok(())
    }

    /// Registers `workflow_id` as pointing at `workflow_hash`, overwriting
    /// any previous registration. Not part of [`WorkflowRegistry`]: workflow
    /// registration is an operator action, not something the engine does.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`].
    pub fn register(&self, workflow_id: &WorkflowId, workflow_hash: &WorkflowHash) -> Result<(), RegistryError> {
        let mut index = self.read_index()?;
        index.workflows.insert(workflow_id.as_str().to_string(), workflow_hash.as_str().to_string());
        self.write_index(&index)
    }
}

impl WorkflowRegistry for FsWorkflowRegistry<'_> {
    fn list(&self) -> Result<Vec<WorkflowSummary>, CasStoreError> {
        let index = self.read_index().map_err(|err| CasStoreError::CorruptionDetected(err.to_string()))?;
        let mut summaries = Vec::with_capacity(index.workflows.len());
        for (workflow_id, workflow_hash) in &index.workflows {
            let workflow_id = WorkflowId::new(workflow_id.clone());
            let workflow_hash = WorkflowHash::new(workflow_hash.clone());
            let step_count = self.workflow_store.get(&workflow_hash)?.map_or(0, |workflow| workflow.steps.len());
            summaries.push(WorkflowSummary { workflow_id, workflow_hash, step_count });
        }
        Ok(summaries)
    }

    fn resolve(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowHash>, CasStoreError> {
        let index = self.read_index().map_err(|err| CasStoreError::CorruptionDetected(err.to_string()))?;
        Ok(index.workflows.get(workflow_id.as_str()).cloned().map(WorkflowHash::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::FsPinnedWorkflowStore;
    use crate::filesystem::LocalFileSystem;
    use std::collections::BTreeMap as StdBTreeMap;
    use workrail_core::core::identifiers::StepId;
    use workrail_core::core::workflow::PinnedWorkflow;

    #[test]
    fn resolve_of_an_unregistered_id_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let workflow_store = FsPinnedWorkflowStore::new(&fs, dir.path().join("workflows"));
        let registry = FsWorkflowRegistry::new(&fs, dir.path().join("registry.json"), &workflow_store);
        assert_eq!(registry.resolve(&WorkflowId::new("wf_missing")).expect("resolve"), None);
    }

    #[test]
    fn register_then_resolve_and_list_reflects_the_registration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let workflow_store = FsPinnedWorkflowStore::new(&fs, dir.path().join("workflows"));
        let registry = FsWorkflowRegistry::new(&fs, dir.path().join("registry.json"), &workflow_store);

        let workflow = PinnedWorkflow {
            workflow_id: WorkflowId::new("wf_a"),
            root_step_id: StepId::new("step_root"),
            steps: StdBTreeMap::new(),
        };
        let hash = workflow_store.put(&workflow).expect("put");
        registry.register(&WorkflowId::new("wf_a"), &hash).expect("register");

        assert_eq!(registry.resolve(&WorkflowId::new("wf_a")).expect("resolve"), Some(hash.clone()));
        let listed = registry.list().expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workflow_hash, hash);
        assert_eq!(listed[0].step_count, 0);
    }
}
