// workrail-core/src/core/workflow.rs
// ============================================================================
// Module: WorkRail Pinned Workflow
// Description: The minimal compiled-workflow shape the engine consumes.
// Purpose: Carry only what advance/block decisions need; authoring is external.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! Workflow loading and compilation from JSON source files is an external
//! collaborator's concern (§1 Out of scope). What the engine consumes is a
//! [`PinnedWorkflow`]: a compiled, content-addressed step graph. Its shape
//! here covers exactly what §4.7 reads — step transitions, output
//! requirements, required context keys, and required capabilities — and
//! nothing about how a workflow author's JSON becomes one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::LoopId;
use crate::core::identifiers::StepId;

// ============================================================================
// SECTION: Step Transitions
// ============================================================================

/// How a step's successor is determined once it advances (loosely the
/// teacher's `AdvanceTo` shape, narrowed to what a linear/looping workflow
/// needs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextStep {
    /// Advance to the named step.
    Step {
        /// The next step's id.
        step_id: StepId,
    },
    /// Enter or continue a loop body.
    Loop {
        /// The loop's id.
        loop_id: LoopId,
        /// The first step of the loop body.
        body_step_id: StepId,
        /// Maximum iteration count before the loop is forced to exit.
        max_iterations: u64,
        /// The step to advance to once the loop exits.
        exit_step_id: StepId,
    },
    /// This step is the run's terminal step; advancing completes the run.
    Terminal,
}

// ============================================================================
// SECTION: Step Specification
// ============================================================================

/// A declared acceptance criterion checked against supplied notes (§4.7.7).
/// Workflow authoring itself is out of scope; this is the narrow shape the
/// engine evaluates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationCriteria {
    /// Notes markdown must contain `needle`.
    ContainsSubstring {
        /// The required substring.
        needle: String,
    },
}

impl ValidationCriteria {
    /// Checks `markdown` against this criterion.
    #[must_use]
    pub fn is_satisfied_by(&self, markdown: &str) -> bool {
        match self {
            Self::ContainsSubstring { needle } => markdown.contains(needle.as_str()),
        }
    }
}

/// One compiled step (§4.7 reads `outputContract`, `validationCriteria`,
/// `notesOptional`, required context keys, and required capabilities off
/// this shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// This step's id.
    pub step_id: StepId,
    /// Context keys that must be present in the merged context before this
    /// step can advance.
    #[serde(default)]
    pub required_context_keys: Vec<String>,
    /// Capability names that must be `available` before this step can advance.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Whether this step declares a user-only dependency (§3.5 `USER_ONLY_DEPENDENCY`).
    #[serde(default)]
    pub user_only_dependency: bool,
    /// Reference id of the output contract this step's output must satisfy, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_contract_ref: Option<String>,
    /// Acceptance criteria checked against supplied notes, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_criteria: Option<ValidationCriteria>,
    /// Whether notes are optional for this step (§4.7.7).
    #[serde(default)]
    pub notes_optional: bool,
    /// How this step's successor is determined.
    pub next: NextStep,
}

// ============================================================================
// SECTION: Pinned Workflow
// ============================================================================

/// A compiled workflow definition, stored content-addressed by
/// [`crate::core::identifiers::WorkflowHash`] (§3.1, §4.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedWorkflow {
    /// The workflow id as supplied by the caller at `start_workflow`.
    pub workflow_id: crate::core::identifiers::WorkflowId,
    /// The entry step.
    pub root_step_id: StepId,
    /// All steps, keyed by id.
    pub steps: BTreeMap<StepId, StepSpec>,
}

impl PinnedWorkflow {
    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, step_id: &StepId) -> Option<&StepSpec> {
        self.steps.get(step_id)
    }
}
