// workrail-core/src/core/events.rs
// ============================================================================
// Module: WorkRail Domain Event Schema
// Description: The closed-set tagged union of event kinds and the event envelope.
// Purpose: Define the single source of truth every projection folds over.
// Dependencies: crate::core, serde, serde_json
// ============================================================================

//! ## Overview
//! Every event carries the envelope fields described in §3.2: a schema
//! version, a unique id, a 0-based monotonic index within its session, the
//! owning session, a closed-set `kind`, a `dedupeKey`, an optional scope,
//! and `data` whose shape `kind` determines. `DomainEvent` is the exhaustive
//! tagged union the engine appends and projections fold over (§9: "Closed
//! tagged unions").

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::EventId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::WorkflowHash;
use crate::core::model::BlockedPayload;
use crate::core::model::EdgeCause;
use crate::core::model::EdgeKind;
use crate::core::model::Gap;
use crate::core::model::NodeKind;
use crate::core::model::Output;
use crate::core::model::Preferences;
use crate::core::time::Timestamp;

/// The envelope schema version every event currently carries.
pub const SCHEMA_VERSION: u8 = 1;

// ============================================================================
// SECTION: Scope
// ============================================================================

/// Optional run/node scoping carried on every event (§3.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventScope {
    /// The run this event pertains to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// The node this event pertains to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

// ============================================================================
// SECTION: Event Data (closed union, one variant per kind)
// ============================================================================

/// The closed set of event kinds and their associated data (§3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    /// A brand-new session was created.
    SessionCreated {
        /// The workflow id the session was started against.
        workflow_id: crate::core::identifiers::WorkflowId,
        /// The pinned workflow hash in effect for this session.
        workflow_hash: WorkflowHash,
    },
    /// An observation about the calling workspace was recorded.
    ObservationRecorded {
        /// Free-form observation payload (e.g. `git_head_sha`, `git_branch`).
        data: Value,
    },
    /// A new run was started within the session.
    RunStarted {
        /// The new run's id.
        run_id: RunId,
        /// The run's root node id.
        root_node_id: NodeId,
    },
    /// A node was added to a run DAG.
    NodeCreated {
        /// The new node's id.
        node_id: NodeId,
        /// The node's kind.
        node_kind: NodeKind,
        /// The parent node id, or `None` only for a run's root node.
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_node_id: Option<NodeId>,
        /// The execution snapshot ref this node is bound to.
        snapshot_ref: crate::core::identifiers::SnapshotRef,
    },
    /// An edge was added between two nodes.
    EdgeCreated {
        /// The source node id; must equal the child's `parentNodeId`.
        from_node_id: NodeId,
        /// The destination node id.
        to_node_id: NodeId,
        /// The edge's kind.
        edge_kind: EdgeKind,
        /// The edge's cause.
        cause: EdgeCause,
    },
    /// An advance was recorded; terminal event of every event batch (§4.7.9h).
    AdvanceRecorded {
        /// The outcome tag: `advanced`, `retryable_block`, `terminal_block`, or `complete`.
        outcome: AdvanceOutcome,
    },
    /// An output was appended to a node's channel.
    NodeOutputAppended {
        /// The output that was appended.
        output: Output,
    },
    /// Preferences changed at a node, inherited by its descendants.
    PreferencesChanged {
        /// The node the change applies to.
        node_id: NodeId,
        /// The new preference pair.
        preferences: Preferences,
    },
    /// A capability's status was observed at a node.
    CapabilityObserved {
        /// The node the observation applies to.
        node_id: NodeId,
        /// The capability's name.
        capability: String,
        /// The observed status.
        status: CapabilityStatus,
    },
    /// A gap was recorded.
    GapRecorded {
        /// The gap record.
        gap: Gap,
    },
    /// Evidence of a divergence between expected and actual state.
    DivergenceRecorded {
        /// Free-form divergence payload.
        data: Value,
    },
    /// A decision trace was appended (interpreter reasoning, when produced).
    DecisionTraceAppended {
        /// Free-form trace payload.
        data: Value,
    },
    /// A validation was performed against a step's declared contract/criteria.
    ValidationPerformed {
        /// The validation outcome.
        outcome: ValidationOutcome,
    },
    /// Input context was merged into the stored context.
    ContextSet {
        /// The context delta that was merged in.
        context: Value,
    },
}

/// Closed-set outcome tag carried on `advance_recorded` (§4.7.9h).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The attempt advanced to a new step or checkpoint node.
    Advanced,
    /// The attempt produced a retryable block.
    RetryableBlock,
    /// The attempt produced a sticky terminal block.
    TerminalBlock,
    /// The run reached its terminal, completed state.
    Complete,
}

/// Closed-set capability status (§4.6 "Capabilities").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    /// Never observed.
    Unknown,
    /// Observed as available.
    Available,
    /// Observed as unavailable.
    Unavailable,
}

/// Closed-set classification of an output requirement against a step's
/// declared contract (§4.7.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// The step declares no output contract or validation criteria.
    NotRequired,
    /// The supplied output satisfied the contract and criteria.
    Satisfied,
    /// No output was supplied though one was required.
    Missing {
        /// The unmet contract's reference id.
        contract_ref: String,
    },
    /// An output was supplied but failed the contract or criteria.
    Invalid {
        /// The failed contract's reference id.
        contract_ref: String,
    },
}

// ============================================================================
// SECTION: Event Envelope
// ============================================================================

/// One entry in a session's append-only event log (§3.2).
///
/// # Invariants
/// - `event_index` is 0-based and strictly ascending within one `session_id`.
/// - `dedupe_key` is a deterministic function of this event's logical
///   identity; replaying the same logical event produces an identical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Envelope schema version.
    pub v: u8,
    /// This event's unique id.
    pub event_id: EventId,
    /// 0-based monotonic index within `session_id`.
    pub event_index: u64,
    /// The owning session.
    pub session_id: SessionId,
    /// Deterministic idempotency key; append is idempotent on this value.
    pub dedupe_key: String,
    /// Optional run/node scope.
    #[serde(default, skip_serializing_if = "EventScope::is_empty")]
    pub scope: EventScope,
    /// When this event was recorded.
    pub recorded_at: Timestamp,
    /// The kind-tagged payload.
    pub data: EventData,
}

impl EventScope {
    /// Returns `true` when neither `run_id` nor `node_id` is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.run_id.is_none() && self.node_id.is_none()
    }
}

impl DomainEvent {
    /// Returns the `kind` discriminant string this event serializes under,
    /// matching the closed set named in §3.2.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match &self.data {
            EventData::SessionCreated { .. } => "session_created",
            EventData::ObservationRecorded { .. } => "observation_recorded",
            EventData::RunStarted { .. } => "run_started",
            EventData::NodeCreated { .. } => "node_created",
            EventData::EdgeCreated { .. } => "edge_created",
            EventData::AdvanceRecorded { .. } => "advance_recorded",
            EventData::NodeOutputAppended { .. } => "node_output_appended",
            EventData::PreferencesChanged { .. } => "preferences_changed",
            EventData::CapabilityObserved { .. } => "capability_observed",
            EventData::GapRecorded { .. } => "gap_recorded",
            EventData::DivergenceRecorded { .. } => "divergence_recorded",
            EventData::DecisionTraceAppended { .. } => "decision_trace_appended",
            EventData::ValidationPerformed { .. } => "validation_performed",
            EventData::ContextSet { .. } => "context_set",
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_serde_tag() {
        let event = DomainEvent {
            v: SCHEMA_VERSION,
            event_id: EventId::new("evt_1"),
            event_index: 0,
            session_id: SessionId::new("sess_1"),
            dedupe_key: "dk1".to_string(),
            scope: EventScope::default(),
            recorded_at: Timestamp(0),
            data: EventData::RunStarted {
                run_id: RunId::new("run_1"),
                root_node_id: NodeId::new("node_1"),
            },
        };
        assert_eq!(event.kind(), "run_started");
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["data"]["kind"], "run_started");
    }
}
