// workrail-core/src/api.rs
// ============================================================================
// Module: WorkRail Tool Entry Points
// Description: The six-tool boundary a transport (MCP, HTTP, CLI) binds to.
// Purpose: Thin, serializable request/response shapes atop core::engine.
// Dependencies: crate::core::engine, crate::ports, crate::tooling
// ============================================================================

//! ## Overview
//! §6 names six tools at the engine boundary: `list_workflows`,
//! `inspect_workflow`, `start_workflow`, `continue_workflow`,
//! `checkpoint_workflow`, `resume_session`. The last four are thin
//! pass-throughs onto [`crate::core::engine`]; the first two need the
//! [`crate::ports::WorkflowRegistry`] capability the engine itself has no
//! reason to depend on. This module is the seam a transport adapter binds
//! to; it owns no state of its own.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::engine;
use crate::core::engine::CheckpointResponse;
use crate::core::engine::ContinueRequest;
use crate::core::engine::ContinueResponse;
use crate::core::engine::EngineDeps;
use crate::core::engine::EngineError;
use crate::core::engine::ResumeResponse;
use crate::core::engine::StartResponse;
use crate::core::identifiers::WorkflowId;
use crate::core::workflow::StepSpec;
use crate::ports::CasStoreError;
use crate::ports::WorkflowRegistry;
use crate::ports::WorkflowSummary;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised at the tool-entry-point boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The named workflow is not registered.
    #[error("NOT_FOUND: workflow {0} is not registered")]
    WorkflowNotFound(String),
    /// An error propagated from the advance/block engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// An error propagated from a content-addressed store.
    #[error(transparent)]
    Cas(#[from] CasStoreError),
}

// ============================================================================
// SECTION: list_workflows
// ============================================================================

/// Enumerates every registered workflow (§6 `list_workflows`).
///
/// # Errors
///
/// Returns [`ApiError::Cas`] if the registry fails to enumerate.
pub fn list_workflows(registry: &dyn WorkflowRegistry) -> Result<Vec<WorkflowSummary>, ApiError> {
    Ok(registry.list()?)
}

// ============================================================================
// SECTION: inspect_workflow
// ============================================================================

/// Which level of detail `inspect_workflow` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectMode {
    /// Id, hash, and step count only.
    Metadata,
    /// Metadata plus every step's full specification.
    Preview,
}

/// The response shape for `inspect_workflow` (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowDetails {
    /// The workflow's summary.
    pub summary: WorkflowSummary,
    /// Every step's full specification, present only in [`InspectMode::Preview`].
    pub steps: Option<Vec<StepSpec>>,
}

/// Fetches metadata or a full content preview for `workflow_id` (§6
/// `inspect_workflow`).
///
/// # Errors
///
/// Returns [`ApiError::WorkflowNotFound`] if `workflow_id` is not
/// registered, or [`ApiError::Cas`] on a store failure.
pub fn inspect_workflow(
    deps: &EngineDeps<'_>,
    registry: &dyn WorkflowRegistry,
    workflow_id: &WorkflowId,
    mode: InspectMode,
) -> Result<WorkflowDetails, ApiError> {
    let Some(workflow_hash) = registry.resolve(workflow_id)? else {
        return Err(ApiError::WorkflowNotFound(workflow_id.to_string()));
    };
    let Some(workflow) = deps.workflow_store.get(&workflow_hash)? else {
        return Err(ApiError::WorkflowNotFound(workflow_id.to_string()));
    };

    let summary = WorkflowSummary {
        workflow_id: workflow_id.clone(),
        workflow_hash,
        step_count: workflow.steps.len(),
    };
    let steps = match mode {
        InspectMode::Metadata => None,
        InspectMode::Preview => Some(workflow.steps.into_values().collect()),
    };
    Ok(WorkflowDetails { summary, steps })
}

// ============================================================================
// SECTION: start_workflow / continue_workflow / checkpoint_workflow / resume_session
// ============================================================================

/// Begins a new session against `workflow_id` (§6 `start_workflow`).
///
/// # Errors
///
/// Returns [`ApiError::WorkflowNotFound`] if `workflow_id` is not
/// registered, otherwise propagates [`EngineError`].
pub fn start_workflow(
    deps: &EngineDeps<'_>,
    registry: &dyn WorkflowRegistry,
    workflow_id: &WorkflowId,
    observation: Option<serde_json::Value>,
) -> Result<StartResponse, ApiError> {
    let Some(workflow_hash) = registry.resolve(workflow_id)? else {
        return Err(ApiError::WorkflowNotFound(workflow_id.to_string()));
    };
    let Some(workflow) = deps.workflow_store.get(&workflow_hash)? else {
        return Err(ApiError::WorkflowNotFound(workflow_id.to_string()));
    };
    Ok(engine::start_workflow(deps, workflow_id.clone(), &workflow, observation)?)
}

/// Advances or rehydrates a pending step (§6 `continue_workflow`).
///
/// # Errors
///
/// Propagates [`EngineError`].
pub fn continue_workflow(deps: &EngineDeps<'_>, request: &ContinueRequest) -> Result<ContinueResponse, ApiError> {
    Ok(engine::continue_workflow(deps, request)?)
}

/// Creates a durable progress marker (§6 `checkpoint_workflow`).
///
/// # Errors
///
/// Propagates [`EngineError`].
pub fn checkpoint_workflow(deps: &EngineDeps<'_>, state_token: &str) -> Result<CheckpointResponse, ApiError> {
    Ok(engine::checkpoint_workflow(deps, state_token)?)
}

/// Re-derives fresh tokens for a session's preferred tip (§6 `resume_session`).
///
/// # Errors
///
/// Propagates [`EngineError`].
pub fn resume_session(deps: &EngineDeps<'_>, checkpoint_token: &str, recap_byte_cap: usize) -> Result<ResumeResponse, ApiError> {
    Ok(engine::resume_session(deps, checkpoint_token, recap_byte_cap)?)
}
