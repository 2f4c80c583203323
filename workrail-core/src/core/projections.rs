// workrail-core/src/core/projections.rs
// ============================================================================
// Module: WorkRail Projections
// Description: Pure, deterministic folds from an event log to derived state.
// Purpose: Run DAG + preferred tip, preferences, outputs, gaps, capabilities,
//          session health, run status, and session summaries.
// Dependencies: crate::core::events, crate::core::model, crate::core::identifiers
// ============================================================================

//! ## Overview
//! Every function here takes `events: &[DomainEvent]` already sorted by
//! `eventIndex` ascending and performs a single fold with no I/O (§4.6).
//! Violating the closed invariants these folds enforce — an edge into an
//! unknown node, a supersession cycle, a non-monotonic index — fails with
//! [`ProjectionError`] rather than panicking; callers map that into session
//! health.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use thiserror::Error;

use crate::core::events::AdvanceOutcome;
use crate::core::events::CapabilityStatus;
use crate::core::events::DomainEvent;
use crate::core::events::EventData;
use crate::core::identifiers::GapId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::SnapshotRef;
use crate::core::identifiers::WorkflowId;
use crate::core::model::Autonomy;
use crate::core::model::EdgeCause;
use crate::core::model::EdgeKind;
use crate::core::model::Gap;
use crate::core::model::GapCategory;
use crate::core::model::GapSeverity;
use crate::core::model::NodeKind;
use crate::core::model::Output;
use crate::core::model::OutputChannel;
use crate::core::model::Preferences;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// The closed set of invariant violations a projection can fail with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// Events were not strictly ascending by `eventIndex`.
    #[error("PROJECTION_INVARIANT_VIOLATION: non-ascending event index at {0}")]
    NonMonotonicEventIndex(u64),
    /// A `node_created` event referenced a run that was never started.
    #[error("PROJECTION_INVARIANT_VIOLATION: unknown run {0}")]
    UnknownRun(String),
    /// A `node_created` event named a parent node that does not yet exist.
    #[error("PROJECTION_INVARIANT_VIOLATION: unknown parent node {0}")]
    UnknownParentNode(String),
    /// A duplicate `node_created` for the same `nodeId` disagreed with the
    /// first occurrence.
    #[error("PROJECTION_INVARIANT_VIOLATION: conflicting duplicate node_created for {0}")]
    DuplicateNodeMismatch(String),
    /// An `edge_created` referenced a node that does not exist.
    #[error("PROJECTION_INVARIANT_VIOLATION: edge references unknown node {0}")]
    EdgeUnknownNode(String),
    /// An edge's `fromNodeId` did not equal its child's `parentNodeId`.
    #[error("PROJECTION_INVARIANT_VIOLATION: edge fromNodeId does not match child parentNodeId for {0}")]
    EdgeParentMismatch(String),
    /// A `checkpoint` edge was recorded with a cause other than `checkpoint_created`.
    #[error("PROJECTION_INVARIANT_VIOLATION: checkpoint edge into {0} has wrong cause")]
    CheckpointEdgeWrongCause(String),
    /// An event carrying node/run scope was missing the scope it requires.
    #[error("PROJECTION_INVARIANT_VIOLATION: missing required scope on event {0}")]
    MissingScope(String),
    /// A `supersedesOutputId` pointed at an output id absent from the same (node, channel) history.
    #[error("PROJECTION_INVARIANT_VIOLATION: supersession references unknown output {0}")]
    UnknownSupersededOutput(String),
    /// A supersession chain within one `(node, channel)` formed a cycle.
    #[error("PROJECTION_INVARIANT_VIOLATION: supersession cycle involving output {0}")]
    SupersessionCycle(String),
    /// More than one current output existed on the `recap` channel.
    #[error("PROJECTION_INVARIANT_VIOLATION: recap channel has more than one current output at node {0}")]
    MultipleCurrentRecap(String),
}

// ============================================================================
// SECTION: Shared Helper — Monotonicity
// ============================================================================

fn touch(last_activity: &mut HashMap<NodeId, u64>, node_id: &NodeId, index: u64) {
    let entry = last_activity.entry(node_id.clone()).or_insert(0);
    if index > *entry {
        *entry = index;
    }
}

fn assert_ascending(events: &[DomainEvent]) -> Result<(), ProjectionError> {
    let mut last: Option<u64> = None;
    for event in events {
        if let Some(prev) = last {
            if event.event_index <= prev {
                return Err(ProjectionError::NonMonotonicEventIndex(event.event_index));
            }
        }
        last = Some(event.event_index);
    }
    Ok(())
}

// ============================================================================
// SECTION: Run DAG
// ============================================================================

/// One node in a run DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    /// The node's id.
    pub node_id: NodeId,
    /// The node's kind.
    pub node_kind: NodeKind,
    /// The parent node id, `None` only for the run's root.
    pub parent_node_id: Option<NodeId>,
    /// The snapshot this node is bound to.
    pub snapshot_ref: SnapshotRef,
    /// The `eventIndex` of the `node_created` event that introduced it.
    pub created_at_event_index: u64,
}

/// One edge in a run DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagEdge {
    /// The source node.
    pub from_node_id: NodeId,
    /// The destination node.
    pub to_node_id: NodeId,
    /// The edge's kind.
    pub edge_kind: EdgeKind,
    /// The edge's cause.
    pub cause: EdgeCause,
    /// The `eventIndex` of the `edge_created` event.
    pub event_index: u64,
}

/// One run's projected DAG state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Run {
    /// The run's root node, once created.
    pub root_node_id: Option<NodeId>,
    /// All nodes, keyed by id.
    pub nodes_by_id: BTreeMap<NodeId, DagNode>,
    /// All edges, in the order they were recorded.
    pub edges: Vec<DagEdge>,
    /// Nodes with no outgoing edge.
    pub tip_node_ids: Vec<NodeId>,
    /// The single recommended leaf for the next advance.
    pub preferred_tip_node_id: Option<NodeId>,
}

/// Every run in a session, keyed by `runId`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDag {
    /// Runs, keyed by id.
    pub runs_by_id: BTreeMap<RunId, Run>,
}

/// Builds the run DAG projection and selects each run's preferred tip (§4.6
/// "Run DAG").
///
/// # Errors
///
/// Returns [`ProjectionError`] on any of the invariant violations named on
/// its variants.
pub fn project_run_dag(events: &[DomainEvent]) -> Result<RunDag, ProjectionError> {
    assert_ascending(events)?;

    let mut dag = RunDag::default();
    let mut has_outgoing: BTreeMap<NodeId, bool> = BTreeMap::new();
    let mut last_activity: HashMap<NodeId, u64> = HashMap::new();

    for event in events {
        match &event.data {
            EventData::RunStarted { run_id, root_node_id } => {
                let run = dag.runs_by_id.entry(run_id.clone()).or_default();
                run.root_node_id = Some(root_node_id.clone());
            }
            EventData::NodeCreated {
                node_id,
                node_kind,
                parent_node_id,
                snapshot_ref,
            } => {
                let run_id = event
                    .scope
                    .run_id
                    .clone()
                    .ok_or_else(|| ProjectionError::MissingScope(event.event_id.to_string()))?;
                let run = dag
                    .runs_by_id
                    .get_mut(&run_id)
                    .ok_or_else(|| ProjectionError::UnknownRun(run_id.to_string()))?;

                if let Some(parent) = parent_node_id {
                    if !run.nodes_by_id.contains_key(parent) {
                        return Err(ProjectionError::UnknownParentNode(parent.to_string()));
                    }
                }

                match run.nodes_by_id.get(node_id) {
                    Some(existing) => {
                        if existing.node_kind != *node_kind
                            || existing.parent_node_id != *parent_node_id
                            || existing.snapshot_ref != *snapshot_ref
                        {
                            return Err(ProjectionError::DuplicateNodeMismatch(node_id.to_string()));
                        }
                    }
                    None => {
                        run.nodes_by_id.insert(
                            node_id.clone(),
                            DagNode {
                                node_id: node_id.clone(),
                                node_kind: *node_kind,
                                parent_node_id: parent_node_id.clone(),
                                snapshot_ref: snapshot_ref.clone(),
                                created_at_event_index: event.event_index,
                            },
                        );
                        has_outgoing.insert(node_id.clone(), false);
                        touch(&mut last_activity, node_id, event.event_index);
                    }
                }
            }
            EventData::EdgeCreated {
                from_node_id,
                to_node_id,
                edge_kind,
                cause,
            } => {
                let run_id = event
                    .scope
                    .run_id
                    .clone()
                    .ok_or_else(|| ProjectionError::MissingScope(event.event_id.to_string()))?;
                let run = dag
                    .runs_by_id
                    .get_mut(&run_id)
                    .ok_or_else(|| ProjectionError::UnknownRun(run_id.to_string()))?;

                let child = run
                    .nodes_by_id
                    .get(to_node_id)
                    .ok_or_else(|| ProjectionError::EdgeUnknownNode(to_node_id.to_string()))?;
                if !run.nodes_by_id.contains_key(from_node_id) {
                    return Err(ProjectionError::EdgeUnknownNode(from_node_id.to_string()));
                }
                if child.parent_node_id.as_ref() != Some(from_node_id) {
                    return Err(ProjectionError::EdgeParentMismatch(to_node_id.to_string()));
                }
                if *edge_kind == EdgeKind::Checkpoint && *cause != EdgeCause::CheckpointCreated {
                    return Err(ProjectionError::CheckpointEdgeWrongCause(to_node_id.to_string()));
                }

                run.edges.push(DagEdge {
                    from_node_id: from_node_id.clone(),
                    to_node_id: to_node_id.clone(),
                    edge_kind: *edge_kind,
                    cause: *cause,
                    event_index: event.event_index,
                });
                has_outgoing.insert(from_node_id.clone(), true);
                touch(&mut last_activity, from_node_id, event.event_index);
                touch(&mut last_activity, to_node_id, event.event_index);
            }
            _ => {
                if let Some(node_id) = &event.scope.node_id {
                    touch(&mut last_activity, node_id, event.event_index);
                }
            }
        }
    }

    for run in dag.runs_by_id.values_mut() {
        run.tip_node_ids = run
            .nodes_by_id
            .keys()
            .filter(|node_id| !has_outgoing.get(*node_id).copied().unwrap_or(false))
            .cloned()
            .collect();
        run.preferred_tip_node_id = select_preferred_tip(run, &last_activity);
    }

    Ok(dag)
}

/// Walks from `node_id` to its run's root, returning the maximum recorded
/// activity index touching any node on that path (the leaf included).
fn max_activity_to_root(run: &Run, node_id: &NodeId, last_activity: &HashMap<NodeId, u64>, memo: &mut HashMap<NodeId, u64>) -> u64 {
    if let Some(&cached) = memo.get(node_id) {
        return cached;
    }
    let own = last_activity.get(node_id).copied().unwrap_or(0);
    let value = match run.nodes_by_id.get(node_id).and_then(|node| node.parent_node_id.as_ref()) {
        Some(parent) => own.max(max_activity_to_root(run, parent, last_activity, memo)),
        None => own,
    };
    memo.insert(node_id.clone(), value);
    value
}

fn select_preferred_tip(run: &Run, last_activity: &HashMap<NodeId, u64>) -> Option<NodeId> {
    let mut memo = HashMap::new();
    run.tip_node_ids
        .iter()
        .map(|node_id| {
            let activity = max_activity_to_root(run, node_id, last_activity, &mut memo);
            let created_at = run.nodes_by_id.get(node_id).map_or(0, |node| node.created_at_event_index);
            (activity, created_at, node_id.clone())
        })
        .max_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)))
        .map(|(_, _, node_id)| node_id)
}

// ============================================================================
// SECTION: Preferences
// ============================================================================

/// Effective `{autonomy, riskPolicy}` at every node that has been created or
/// had a preference change recorded (§4.6 "Preferences").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencesProjection {
    parent_of: HashMap<NodeId, Option<NodeId>>,
    own_delta: HashMap<NodeId, Preferences>,
}

impl PreferencesProjection {
    /// Resolves the effective preferences at `node_id`: its own delta, or
    /// whatever it inherited walking up to the first ancestor with one, or
    /// the guided/conservative default.
    #[must_use]
    pub fn effective_at(&self, node_id: &NodeId) -> Preferences {
        let mut current = Some(node_id.clone());
        while let Some(node) = current {
            if let Some(prefs) = self.own_delta.get(&node) {
                return *prefs;
            }
            current = self.parent_of.get(&node).cloned().flatten();
        }
        Preferences::guided_conservative()
    }
}

/// Builds the preferences projection (§4.6 "Preferences").
#[must_use]
pub fn project_preferences(events: &[DomainEvent]) -> PreferencesProjection {
    let mut projection = PreferencesProjection::default();
    for event in events {
        match &event.data {
            EventData::NodeCreated {
                node_id,
                parent_node_id,
                ..
            } => {
                projection.parent_of.entry(node_id.clone()).or_insert_with(|| parent_node_id.clone());
            }
            EventData::PreferencesChanged { node_id, preferences } => {
                projection.own_delta.insert(node_id.clone(), *preferences);
            }
            _ => {}
        }
    }
    projection
}

// ============================================================================
// SECTION: Node Outputs
// ============================================================================

/// History plus the non-superseded current set for one `(node, channel)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeChannelOutputs {
    /// Every output ever appended, in event order.
    pub history: Vec<Output>,
    /// Outputs not transitively superseded.
    pub current: Vec<Output>,
}

/// Per-node, per-channel output projection (§4.6 "Node outputs").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOutputsProjection {
    /// Outputs keyed by `(nodeId, channel)`.
    pub by_node_and_channel: BTreeMap<(NodeId, OutputChannel), NodeChannelOutputs>,
}

/// Builds the node-outputs projection, validating the supersession chain
/// within each `(node, channel)` group (§4.6 "Node outputs", §3.7).
///
/// # Errors
///
/// Returns [`ProjectionError::UnknownSupersededOutput`],
/// [`ProjectionError::SupersessionCycle`], or
/// [`ProjectionError::MultipleCurrentRecap`].
pub fn project_node_outputs(events: &[DomainEvent]) -> Result<NodeOutputsProjection, ProjectionError> {
    let mut projection = NodeOutputsProjection::default();

    for event in events {
        if let EventData::NodeOutputAppended { output } = &event.data {
            let key = (output.node_id.clone(), output.channel);
            projection.by_node_and_channel.entry(key).or_default().history.push(output.clone());
        }
    }

    for ((node_id, channel), group) in &mut projection.by_node_and_channel {
        let by_id: HashMap<_, _> = group.history.iter().map(|o| (o.output_id.clone(), o)).collect();
        let mut superseded: BTreeSet<_> = BTreeSet::new();

        for output in &group.history {
            if let Some(target) = &output.supersedes_output_id {
                if !by_id.contains_key(target) {
                    return Err(ProjectionError::UnknownSupersededOutput(target.to_string()));
                }
                superseded.insert(target.clone());
            }
        }

        for output in &group.history {
            let mut seen = BTreeSet::new();
            seen.insert(output.output_id.clone());
            let mut cursor = output.supersedes_output_id.clone();
            while let Some(target) = cursor {
                if !seen.insert(target.clone()) {
                    return Err(ProjectionError::SupersessionCycle(output.output_id.to_string()));
                }
                cursor = by_id.get(&target).and_then(|o| o.supersedes_output_id.clone());
            }
        }

        group.current = group
            .history
            .iter()
            .filter(|output| !superseded.contains(&output.output_id))
            .cloned()
            .collect();

        if *channel == OutputChannel::Recap && group.current.len() > 1 {
            return Err(ProjectionError::MultipleCurrentRecap(node_id.to_string()));
        }
    }

    Ok(projection)
}

// ============================================================================
// SECTION: Gaps
// ============================================================================

/// One gap record together with the scope it was recorded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapRecord {
    /// The gap payload.
    pub gap: Gap,
    /// The run this gap was recorded against, if scoped.
    pub run_id: Option<RunId>,
    /// The `eventIndex` of the `gap_recorded` event that last touched it.
    pub event_index: u64,
}

/// Gaps projection: latest record per `gapId` wins (§4.6 "Gaps").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapsProjection {
    /// Latest record per `gapId`.
    pub by_gap_id: BTreeMap<GapId, GapRecord>,
    /// Gap ids that some later record's `resolvesGapId` resolved.
    pub resolved_gap_ids: BTreeSet<GapId>,
}

impl GapsProjection {
    /// Returns unresolved critical gaps recorded against `run_id`, in
    /// deterministic (`gapId`) order.
    #[must_use]
    pub fn unresolved_critical_for_run(&self, run_id: &RunId) -> Vec<&GapRecord> {
        self.by_gap_id
            .values()
            .filter(|record| record.run_id.as_ref() == Some(run_id))
            .filter(|record| record.gap.severity == GapSeverity::Critical)
            .filter(|record| !self.resolved_gap_ids.contains(&record.gap.gap_id))
            .filter(|record| {
                matches!(
                    record.gap.category,
                    GapCategory::UserOnlyDependency | GapCategory::ContractViolation | GapCategory::CapabilityMissing
                )
            })
            .collect()
    }
}

/// Builds the gaps projection (§4.6 "Gaps").
#[must_use]
pub fn project_gaps(events: &[DomainEvent]) -> GapsProjection {
    let mut projection = GapsProjection::default();
    for event in events {
        if let EventData::GapRecorded { gap } = &event.data {
            if let Some(target) = &gap.resolves_gap_id {
                projection.resolved_gap_ids.insert(target.clone());
            }
            projection.by_gap_id.insert(
                gap.gap_id.clone(),
                GapRecord {
                    gap: gap.clone(),
                    run_id: event.scope.run_id.clone(),
                    event_index: event.event_index,
                },
            );
        }
    }
    projection
}

// ============================================================================
// SECTION: Capabilities
// ============================================================================

/// Latest observed status per `(nodeId, capability)` (§4.6 "Capabilities").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitiesProjection {
    /// Latest status, keyed by `(nodeId, capability name)`.
    pub by_node_and_capability: BTreeMap<(NodeId, String), CapabilityStatus>,
}

/// Builds the capabilities projection (§4.6 "Capabilities").
#[must_use]
pub fn project_capabilities(events: &[DomainEvent]) -> CapabilitiesProjection {
    let mut projection = CapabilitiesProjection::default();
    for event in events {
        if let EventData::CapabilityObserved { node_id, capability, status } = &event.data {
            projection
                .by_node_and_capability
                .insert((node_id.clone(), capability.clone()), *status);
        }
    }
    projection
}

// ============================================================================
// SECTION: Session Health
// ============================================================================

/// Closed-set session health classification (§3.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    /// The event log projects cleanly.
    Healthy,
    /// The tail of the log fails to project or fails store-level validation.
    CorruptTail,
    /// The head of the log fails store-level validation.
    CorruptHead,
    /// The log declares a schema version this build does not understand.
    UnknownVersion,
}

/// Derives session health from whether the run DAG projects cleanly (§4.6
/// "Session health"). Store-level corruption (digest mismatches, schema
/// version) is classified by the event-log store itself before projections
/// ever run; this function covers only the projection-level half of §3.9.
#[must_use]
pub fn project_session_health(events: &[DomainEvent]) -> SessionHealth {
    match project_run_dag(events) {
        Ok(_) => SessionHealth::Healthy,
        Err(_) => SessionHealth::CorruptTail,
    }
}

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Derived blocking signal for one run (§4.6 "Run-status signals").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    /// Whether the run is currently considered blocked.
    pub is_blocked: bool,
    /// The preferred tip's node kind, if the run has any nodes.
    pub preferred_tip_node_kind: Option<NodeKind>,
}

/// Computes `isBlocked` for one run by combining the run DAG, gaps, and
/// preferences projections with the latest `advance_recorded` outcome seen
/// for it (§4.6 "Run-status signals").
#[must_use]
pub fn project_run_status(
    run: &Run,
    run_id: &RunId,
    effective_autonomy: Autonomy,
    latest_advance_outcome: Option<AdvanceOutcome>,
    gaps: &GapsProjection,
) -> RunStatus {
    let preferred_tip_node_kind = run
        .preferred_tip_node_id
        .as_ref()
        .and_then(|node_id| run.nodes_by_id.get(node_id))
        .map(|node| node.node_kind);

    let is_blocked = effective_autonomy != Autonomy::FullAutoNeverStop
        && (matches!(
            latest_advance_outcome,
            Some(AdvanceOutcome::RetryableBlock) | Some(AdvanceOutcome::TerminalBlock)
        ) || !gaps.unresolved_critical_for_run(run_id).is_empty());

    RunStatus {
        is_blocked,
        preferred_tip_node_kind,
    }
}

/// Returns the `eventIndex` of the most recent `advance_recorded` event
/// scoped to `run_id`, if any.
#[must_use]
pub fn latest_advance_outcome_for_run(events: &[DomainEvent], run_id: &RunId) -> Option<AdvanceOutcome> {
    events
        .iter()
        .rev()
        .filter(|event| event.scope.run_id.as_ref() == Some(run_id))
        .find_map(|event| match &event.data {
            EventData::AdvanceRecorded { outcome } => Some(*outcome),
            _ => None,
        })
}

// ============================================================================
// SECTION: Session Summary (for resume)
// ============================================================================

/// A single session's projected summary, used to rank resumable sessions
/// (§4.6 "Session summary for resume", §4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// The owning session.
    pub session_id: SessionId,
    /// The workflow this session was started against.
    pub workflow_id: Option<WorkflowId>,
    /// Projected health.
    pub health: SessionHealth,
    /// The run with the most recent tip activity, if any run exists.
    pub most_active_run_id: Option<RunId>,
    /// That run's preferred tip.
    pub preferred_tip_node_id: Option<NodeId>,
    /// Aggregated recap markdown, newest-to-oldest, truncated to the caller's byte cap.
    pub recap_markdown: String,
    /// The most recent workspace observation payload recorded, if any.
    pub last_observation: Option<serde_json::Value>,
}

/// Maximum ancestor depth walked when aggregating recap markdown (§4.6).
pub const RECAP_WALK_DEPTH_CAP: usize = 100;

/// Projects one session's summary for the resume candidate list (§4.6
/// "Session summary for resume"). Enumerating session directories and
/// ranking across sessions is the caller's responsibility (it requires
/// filesystem I/O); this function covers the pure per-session half.
///
/// # Errors
///
/// Returns [`ProjectionError`] if the run DAG fails to project.
pub fn project_session_summary(
    session_id: &SessionId,
    events: &[DomainEvent],
    recap_byte_cap: usize,
) -> Result<SessionSummary, ProjectionError> {
    let health = project_session_health(events);
    if !matches!(health, SessionHealth::Healthy) {
        return Ok(SessionSummary {
            session_id: session_id.clone(),
            workflow_id: None,
            health,
            most_active_run_id: None,
            preferred_tip_node_id: None,
            recap_markdown: String::new(),
            last_observation: None,
        });
    }

    let dag = project_run_dag(events)?;
    let outputs = project_node_outputs(events)?;

    let workflow_id = events.iter().find_map(|event| match &event.data {
        EventData::SessionCreated { workflow_id, .. } => Some(workflow_id.clone()),
        _ => None,
    });

    let last_observation = events.iter().rev().find_map(|event| match &event.data {
        EventData::ObservationRecorded { data } => Some(data.clone()),
        _ => None,
    });

    let mut best: Option<(u64, RunId)> = None;
    for (run_id, run) in &dag.runs_by_id {
        if let Some(tip) = &run.preferred_tip_node_id {
            if let Some(node) = run.nodes_by_id.get(tip) {
                let candidate = node.created_at_event_index;
                if best.as_ref().is_none_or(|(activity, _)| candidate > *activity) {
                    best = Some((candidate, run_id.clone()));
                }
            }
        }
    }

    let Some((_, most_active_run_id)) = best else {
        return Ok(SessionSummary {
            session_id: session_id.clone(),
            workflow_id,
            health,
            most_active_run_id: None,
            preferred_tip_node_id: None,
            recap_markdown: String::new(),
            last_observation,
        });
    };

    let run = &dag.runs_by_id[&most_active_run_id];
    let preferred_tip_node_id = run.preferred_tip_node_id.clone();

    let mut recap_markdown = String::new();
    let mut cursor = preferred_tip_node_id.clone();
    let mut depth = 0;
    while let Some(node_id) = cursor {
        if depth >= RECAP_WALK_DEPTH_CAP || recap_markdown.len() >= recap_byte_cap {
            break;
        }
        if let Some(channel_outputs) = outputs.by_node_and_channel.get(&(node_id.clone(), OutputChannel::Recap)) {
            for output in &channel_outputs.current {
                if let crate::core::model::OutputPayload::Notes { markdown } = &output.payload {
                    if !recap_markdown.is_empty() {
                        recap_markdown.push_str("\n---\n");
                    }
                    recap_markdown.push_str(markdown);
                }
            }
        }
        cursor = run.nodes_by_id.get(&node_id).and_then(|node| node.parent_node_id.clone());
        depth += 1;
    }
    recap_markdown.truncate(recap_byte_cap.min(recap_markdown.len()));

    Ok(SessionSummary {
        session_id: session_id.clone(),
        workflow_id,
        health,
        most_active_run_id: Some(most_active_run_id),
        preferred_tip_node_id,
        recap_markdown,
        last_observation,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifiers::EventId;
    use crate::core::identifiers::SnapshotRef;
    use crate::core::time::Timestamp;
    use crate::core::events::EventScope;

    fn event(index: u64, run_id: Option<RunId>, node_id: Option<NodeId>, data: EventData) -> DomainEvent {
        DomainEvent {
            v: 1,
            event_id: EventId::new(format!("evt_{index}")),
            event_index: index,
            session_id: SessionId::new("sess_1"),
            dedupe_key: format!("dk_{index}"),
            scope: EventScope { run_id, node_id },
            recorded_at: Timestamp(0),
            data,
        }
    }

    fn snap(n: u8) -> SnapshotRef {
        SnapshotRef::new(format!("sha256:{}", "a".repeat(63) + &n.to_string()))
    }

    #[test]
    fn run_dag_rejects_non_ascending_index() {
        let events = vec![
            event(1, None, None, EventData::RunStarted {
                run_id: RunId::new("run_1"),
                root_node_id: NodeId::new("node_root"),
            }),
            event(0, None, None, EventData::RunStarted {
                run_id: RunId::new("run_2"),
                root_node_id: NodeId::new("node_root2"),
            }),
        ];
        assert!(matches!(project_run_dag(&events), Err(ProjectionError::NonMonotonicEventIndex(0))));
    }

    #[test]
    fn preferred_tip_picks_higher_created_at_on_tie() {
        let run_id = RunId::new("run_1");
        let root = NodeId::new("root");
        let a = NodeId::new("a");
        let b = NodeId::new("b");

        let events = vec![
            event(0, Some(run_id.clone()), None, EventData::RunStarted {
                run_id: run_id.clone(),
                root_node_id: root.clone(),
            }),
            event(1, Some(run_id.clone()), Some(root.clone()), EventData::NodeCreated {
                node_id: root.clone(),
                node_kind: NodeKind::Step,
                parent_node_id: None,
                snapshot_ref: snap(0),
            }),
            event(5, Some(run_id.clone()), Some(a.clone()), EventData::NodeCreated {
                node_id: a.clone(),
                node_kind: NodeKind::Step,
                parent_node_id: Some(root.clone()),
                snapshot_ref: snap(1),
            }),
            event(7, Some(run_id.clone()), Some(b.clone()), EventData::NodeCreated {
                node_id: b.clone(),
                node_kind: NodeKind::Step,
                parent_node_id: Some(root.clone()),
                snapshot_ref: snap(2),
            }),
        ];

        let dag = project_run_dag(&events).expect("projects");
        let run = &dag.runs_by_id[&run_id];
        assert_eq!(run.preferred_tip_node_id, Some(b.clone()));

        let mut events = events;
        events.push(event(9, Some(run_id.clone()), Some(a.clone()), EventData::ContextSet {
            context: serde_json::json!({}),
        }));
        let dag = project_run_dag(&events).expect("projects");
        let run = &dag.runs_by_id[&run_id];
        assert_eq!(run.preferred_tip_node_id, Some(a));
    }

    proptest::proptest! {
        #[test]
        fn preferred_tip_is_always_the_star_leaf_created_last(child_count in 1usize..12) {
            let run_id = RunId::new("run_star");
            let root = NodeId::new("root");

            let mut events = vec![
                event(0, Some(run_id.clone()), None, EventData::RunStarted {
                    run_id: run_id.clone(),
                    root_node_id: root.clone(),
                }),
                event(1, Some(run_id.clone()), Some(root.clone()), EventData::NodeCreated {
                    node_id: root.clone(),
                    node_kind: NodeKind::Step,
                    parent_node_id: None,
                    snapshot_ref: snap(0),
                }),
            ];

            let mut last_child = root.clone();
            for i in 0..child_count {
                let child = NodeId::new(format!("child_{i}"));
                events.push(event(
                    u64::try_from(i).unwrap_or(0) + 2,
                    Some(run_id.clone()),
                    Some(child.clone()),
                    EventData::NodeCreated {
                        node_id: child.clone(),
                        node_kind: NodeKind::Step,
                        parent_node_id: Some(root.clone()),
                        snapshot_ref: snap(1),
                    },
                ));
                last_child = child;
            }

            let dag = project_run_dag(&events).expect("star graph always projects");
            let run = &dag.runs_by_id[&run_id];

            // No activity after creation, so the child created at the highest
            // event index is the only one that can be preferred: its own
            // activity strictly exceeds every earlier-created sibling's.
            proptest::prop_assert_eq!(run.preferred_tip_node_id.as_ref(), Some(&last_child));

            // Re-projecting identical events must select the same tip.
            let dag_again = project_run_dag(&events).expect("projects");
            proptest::prop_assert_eq!(
                dag_again.runs_by_id[&run_id].preferred_tip_node_id.clone(),
                run.preferred_tip_node_id.clone(),
            );
        }
    }

    #[test]
    fn node_outputs_current_excludes_superseded() {
        use crate::core::identifiers::OutputId;
        use crate::core::model::OutputPayload;

        let node_id = NodeId::new("node_1");
        let first = Output {
            output_id: OutputId::new("out_1"),
            node_id: node_id.clone(),
            channel: OutputChannel::Recap,
            payload: OutputPayload::Notes { markdown: "first".to_string() },
            supersedes_output_id: None,
        };
        let second = Output {
            output_id: OutputId::new("out_2"),
            node_id: node_id.clone(),
            channel: OutputChannel::Recap,
            payload: OutputPayload::Notes { markdown: "second".to_string() },
            supersedes_output_id: Some(OutputId::new("out_1")),
        };

        let events = vec![
            event(0, None, Some(node_id.clone()), EventData::NodeOutputAppended { output: first }),
            event(1, None, Some(node_id.clone()), EventData::NodeOutputAppended { output: second.clone() }),
        ];

        let projection = project_node_outputs(&events).expect("projects");
        let group = &projection.by_node_and_channel[&(node_id, OutputChannel::Recap)];
        assert_eq!(group.current.len(), 1);
        assert_eq!(group.current[0], second);
    }

    #[test]
    fn node_outputs_detects_cycle() {
        use crate::core::identifiers::OutputId;
        use crate::core::model::OutputPayload;

        let node_id = NodeId::new("node_1");
        let a = Output {
            output_id: OutputId::new("out_a"),
            node_id: node_id.clone(),
            channel: OutputChannel::Artifact,
            payload: OutputPayload::Notes { markdown: "a".to_string() },
            supersedes_output_id: Some(OutputId::new("out_b")),
        };
        let b = Output {
            output_id: OutputId::new("out_b"),
            node_id: node_id.clone(),
            channel: OutputChannel::Artifact,
            payload: OutputPayload::Notes { markdown: "b".to_string() },
            supersedes_output_id: Some(OutputId::new("out_a")),
        };

        let events = vec![
            event(0, None, Some(node_id.clone()), EventData::NodeOutputAppended { output: a }),
            event(1, None, Some(node_id.clone()), EventData::NodeOutputAppended { output: b }),
        ];

        assert!(matches!(project_node_outputs(&events), Err(ProjectionError::SupersessionCycle(_))));
    }

    #[test]
    fn gaps_projection_tracks_resolution_linkage() {
        let gap_id = GapId::new("gap_1");
        let resolver_id = GapId::new("gap_2");
        let events = vec![
            event(0, Some(RunId::new("run_1")), None, EventData::GapRecorded {
                gap: Gap {
                    gap_id: gap_id.clone(),
                    severity: GapSeverity::Critical,
                    category: GapCategory::CapabilityMissing,
                    message: "missing capability".to_string(),
                    resolves_gap_id: None,
                },
            }),
            event(1, Some(RunId::new("run_1")), None, EventData::GapRecorded {
                gap: Gap {
                    gap_id: resolver_id,
                    severity: GapSeverity::Info,
                    category: GapCategory::Unexpected,
                    message: "resolved".to_string(),
                    resolves_gap_id: Some(gap_id.clone()),
                },
            }),
        ];

        let projection = project_gaps(&events);
        assert!(projection.resolved_gap_ids.contains(&gap_id));
        assert!(projection.unresolved_critical_for_run(&RunId::new("run_1")).is_empty());
    }
}
