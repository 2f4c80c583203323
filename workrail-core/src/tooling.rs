// workrail-core/src/tooling.rs
// ============================================================================
// Module: Tooling Identifiers
// Description: Canonical tool identifiers for the WorkRail engine boundary.
// Purpose: Shared tool naming across transports, runtime, and config.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Canonical tool identifiers for the WorkRail engine boundary (§6 "Tool
//! surface"). These names are part of the external contract surface; the
//! transport that exposes them (MCP, HTTP, a CLI) is out of scope here.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Canonical tool names on the WorkRail engine boundary (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Enumerate workflows.
    ListWorkflows,
    /// Fetch a workflow's metadata or a content preview.
    InspectWorkflow,
    /// Begin a new session against a pinned workflow.
    StartWorkflow,
    /// Advance or rehydrate a pending step.
    ContinueWorkflow,
    /// Create a durable progress marker.
    CheckpointWorkflow,
    /// Rank resumable sessions for a workspace.
    ResumeSession,
}

impl ToolName {
    /// Returns the canonical string name for the tool.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListWorkflows => "list_workflows",
            Self::InspectWorkflow => "inspect_workflow",
            Self::StartWorkflow => "start_workflow",
            Self::ContinueWorkflow => "continue_workflow",
            Self::CheckpointWorkflow => "checkpoint_workflow",
            Self::ResumeSession => "resume_session",
        }
    }

    /// Returns all WorkRail tool names in canonical order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::ListWorkflows,
            Self::InspectWorkflow,
            Self::StartWorkflow,
            Self::ContinueWorkflow,
            Self::CheckpointWorkflow,
            Self::ResumeSession,
        ]
    }

    /// Parses a tool name from its string representation.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "list_workflows" => Some(Self::ListWorkflows),
            "inspect_workflow" => Some(Self::InspectWorkflow),
            "start_workflow" => Some(Self::StartWorkflow),
            "continue_workflow" => Some(Self::ContinueWorkflow),
            "checkpoint_workflow" => Some(Self::CheckpointWorkflow),
            "resume_session" => Some(Self::ResumeSession),
            _ => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_name_round_trips_through_parse() {
        for tool in ToolName::all() {
            assert_eq!(ToolName::parse(tool.as_str()), Some(*tool));
        }
    }
}
