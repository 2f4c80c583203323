// workrail-core/src/core/model.rs
// ============================================================================
// Module: WorkRail Domain Model
// Description: Node/edge kinds, execution snapshots, blockers, gaps, preferences, outputs.
// Purpose: The closed tagged unions that make up the engine's durable state shape.
// Dependencies: crate::core::identifiers, crate::core::time, serde
// ============================================================================

//! ## Overview
//! These are the sum types §9 calls out for exhaustive, compiler-enforced
//! handling: [`EngineState`], [`BlockedPayload`], [`Reason`],
//! [`BlockerPointer`], and [`OutputPayload`]. None of them perform I/O;
//! they are pure data, matching the teacher's `core::disclosure`/`core::spec`
//! convention of tagged-union DTOs with `#[serde(tag = "kind", ...)]`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AttemptId;
use crate::core::identifiers::GapId;
use crate::core::identifiers::LoopFrame;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutputId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::StepInstanceKey;

// ============================================================================
// SECTION: Node & Edge Kinds
// ============================================================================

/// Closed set of node kinds in a run DAG (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A pending or completed workflow step.
    Step,
    /// A durable progress marker.
    Checkpoint,
    /// An attempt that failed validation or blocked on a reason. Always a leaf.
    BlockedAttempt,
}

/// Closed set of edge kinds (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Parent to child after a successful advance.
    AckedStep,
    /// Parent to a checkpoint node.
    Checkpoint,
}

/// Closed set of causes recorded on an edge (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCause {
    /// The ack token replayed an already-applied advance.
    IdempotentReplay,
    /// A deliberate fork off a non-terminal prior node.
    IntentionalFork,
    /// The state token targeted a non-tip node when the advance was issued.
    NonTipAdvance,
    /// The edge leads to a checkpoint node.
    CheckpointCreated,
}

// ============================================================================
// SECTION: Preferences
// ============================================================================

/// Autonomy policy governing how the engine reacts to blocking reasons (§3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autonomy {
    /// Block on any reason; require an explicit agent decision to proceed.
    Guided,
    /// Proceed automatically except when a reason involves a user-only dependency.
    FullAutoStopOnUserDeps,
    /// Never block; suppressed reasons are recorded as gaps instead.
    FullAutoNeverStop,
}

/// Risk tolerance applied alongside [`Autonomy`] (§3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskPolicy {
    /// Prefer the safest available path.
    Conservative,
    /// Default middle ground.
    Balanced,
    /// Prefer forward progress over caution.
    Aggressive,
}

/// The effective preference pair at a node: the node's own delta, or
/// whatever it inherited from its parent (§4.6 "Preferences").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Autonomy level.
    pub autonomy: Autonomy,
    /// Risk policy.
    pub risk_policy: RiskPolicy,
}

impl Preferences {
    /// The conservative, most-cautious default: guided autonomy, conservative risk.
    #[must_use]
    pub const fn guided_conservative() -> Self {
        Self {
            autonomy: Autonomy::Guided,
            risk_policy: RiskPolicy::Conservative,
        }
    }
}

// ============================================================================
// SECTION: Blocker Codes, Pointers, Reasons
// ============================================================================

/// Closed set of blocker codes (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockerCode {
    /// The pending step can only be completed by a human, not the agent.
    UserOnlyDependency,
    /// A declared required output was not supplied.
    MissingRequiredOutput,
    /// A supplied required output failed its contract or criteria.
    InvalidRequiredOutput,
    /// Notes were required but not supplied.
    MissingRequiredNotes,
    /// A context key the step declares as required is missing from the merged context.
    MissingContextKey,
    /// The merged context exceeded the canonical byte budget.
    ContextBudgetExceeded,
    /// A required capability's status has never been observed.
    RequiredCapabilityUnknown,
    /// A required capability was observed as unavailable.
    RequiredCapabilityUnavailable,
    /// An internal invariant was violated.
    InvariantViolation,
    /// The session event log or a CAS entry was found corrupted.
    StorageCorruptionDetected,
}

/// A typed pointer to what a blocker or gap is about (§3.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockerPointer {
    /// Points at a missing or oversize context key.
    ContextKey {
        /// The JSON path of the offending key.
        path: String,
    },
    /// Points at the context byte budget itself.
    ContextBudget {
        /// The measured size in bytes.
        measured_bytes: u64,
    },
    /// Points at a declared output contract.
    OutputContract {
        /// The contract's reference id.
        contract_ref: String,
    },
    /// Points at a required capability.
    Capability {
        /// The capability's name.
        name: String,
    },
    /// Points at a workflow step.
    WorkflowStep {
        /// The step id.
        step_id: StepId,
    },
}

/// A single deterministically-ordered blocker attached to a blocked snapshot
/// (§3.5). Bounded to [`crate::engine::MAX_BLOCKERS`] per blocked attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blocker {
    /// The blocker's closed-set code.
    pub code: BlockerCode,
    /// What the blocker is about.
    pub pointer: BlockerPointer,
    /// A human-readable message, bounded in UTF-8 bytes.
    pub message: String,
    /// An optional suggested remediation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

/// The richer internal form of a blocking cause, used by projections before
/// it is narrowed down to a [`Blocker`] for the external boundary (§3.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    /// A required output contract was not satisfied.
    OutputRequirement {
        /// The narrowed blocker this reason produces.
        blocker: Blocker,
    },
    /// A required context key is missing.
    MissingContext {
        /// The narrowed blocker this reason produces.
        blocker: Blocker,
    },
    /// A required capability is unknown or unavailable.
    CapabilityUnmet {
        /// The narrowed blocker this reason produces.
        blocker: Blocker,
    },
    /// The pending step declares a user-only dependency.
    UserOnlyDependency {
        /// The narrowed blocker this reason produces.
        blocker: Blocker,
    },
    /// An internal invariant was violated during this attempt.
    InvariantViolation {
        /// The narrowed blocker this reason produces.
        blocker: Blocker,
    },
}

impl Reason {
    /// Narrows this reason down to its externally-reported [`Blocker`] form.
    #[must_use]
    pub const fn blocker(&self) -> &Blocker {
        match self {
            Self::OutputRequirement { blocker }
            | Self::MissingContext { blocker }
            | Self::CapabilityUnmet { blocker }
            | Self::UserOnlyDependency { blocker }
            | Self::InvariantViolation { blocker } => blocker,
        }
    }

    /// Returns `true` when this reason represents a dependency only a human
    /// can resolve (§3.6: suppressing these still records a gap, never a
    /// silent skip).
    #[must_use]
    pub const fn is_user_only_dependency(&self) -> bool {
        matches!(self, Self::UserOnlyDependency { .. })
    }
}

// ============================================================================
// SECTION: Gaps
// ============================================================================

/// Severity of a recorded gap (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    /// Informational only.
    Info,
    /// Worth surfacing but not blocking.
    Warning,
    /// Blocks the run unless autonomy suppresses blocking.
    Critical,
}

/// Closed set of gap categories (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapCategory {
    /// Only a human can resolve this gap.
    UserOnlyDependency,
    /// A declared contract was violated.
    ContractViolation,
    /// A required capability was missing or unavailable.
    CapabilityMissing,
    /// Any other recorded gap.
    Unexpected,
}

/// One append-only gap record (§3.5, §4.6 "Gaps").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    /// The gap's stable identifier; later records with the same id supersede earlier ones.
    pub gap_id: GapId,
    /// Severity.
    pub severity: GapSeverity,
    /// Category.
    pub category: GapCategory,
    /// Human-readable summary.
    pub message: String,
    /// The gap id this record resolves, if this record marks a resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolves_gap_id: Option<GapId>,
}

// ============================================================================
// SECTION: Outputs
// ============================================================================

/// The two output channels a step may emit on (§3.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    /// At most one current `notes` payload.
    Recap,
    /// Many `artifact_ref` payloads.
    Artifact,
}

/// Content-addressed reference to an artifact payload (§3.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    /// SHA-256 hex digest of the artifact bytes.
    pub sha256: String,
    /// MIME content type.
    pub content_type: String,
    /// Byte length of the artifact.
    pub byte_length: u64,
    /// Inline content, when small enough to carry directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The payload carried by one output (§3.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputPayload {
    /// Markdown recap notes.
    Notes {
        /// The markdown text.
        markdown: String,
    },
    /// A content-addressed artifact.
    ArtifactRef {
        /// The artifact reference.
        artifact_ref: ArtifactRef,
    },
}

/// One output emitted by a step, attached to a node + channel (§3.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// This output's identifier, unique within its (node, channel).
    pub output_id: OutputId,
    /// The owning node.
    pub node_id: NodeId,
    /// The channel this output was emitted on.
    pub channel: OutputChannel,
    /// The payload.
    pub payload: OutputPayload,
    /// The output id this one supersedes, if any (same node + same channel).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes_output_id: Option<OutputId>,
}

// ============================================================================
// SECTION: Pending Step & Loop Stack
// ============================================================================

/// One frame of the running loop stack (§3.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStackFrame {
    /// The loop identifier. Unique within the stack.
    pub loop_id: crate::core::identifiers::LoopId,
    /// The 0-based iteration within this loop.
    pub iteration: u64,
    /// Index of the loop body step currently executing.
    pub body_index: u64,
}

/// The next pending step, or `none` when nothing is pending (§3.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingStep {
    /// No step is currently pending.
    None,
    /// A step is pending at the given loop path.
    Some {
        /// The pending step's id.
        step_id: StepId,
        /// The loop path the pending step occurs within.
        loop_path: Vec<LoopFrame>,
    },
}

// ============================================================================
// SECTION: Blocked Payload
// ============================================================================

/// A retryable block: the agent may retry with the given attempt id (§3.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryableBlock {
    /// Ordered, deduplicated, capped reasons for the block.
    pub reason: Vec<Reason>,
    /// The attempt id a retry ack token must target.
    pub retry_attempt_id: AttemptId,
    /// Reference to the validation record that produced this block, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_ref: Option<String>,
    /// The externally-reported blockers, narrowed from `reason`.
    pub blockers: Vec<Blocker>,
}

/// A terminal block: no retry is possible without an intentional fork (§3.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalBlock {
    /// Ordered, deduplicated, capped reasons for the block.
    pub reason: Vec<Reason>,
    /// Reference to the validation record that produced this block, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_ref: Option<String>,
    /// The externally-reported blockers, narrowed from `reason`.
    pub blockers: Vec<Blocker>,
}

/// The closed union of blocked payloads attached to a `blocked` snapshot (§3.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockedPayload {
    /// A retryable block.
    RetryableBlock(RetryableBlock),
    /// A sticky terminal block.
    TerminalBlock(TerminalBlock),
}

// ============================================================================
// SECTION: Execution Snapshot / Engine State
// ============================================================================

/// The discriminated union on `engineState.kind` (§3.4). Snapshots are
/// stored as JCS-canonical bytes; their SHA-256 is the [`crate::core::identifiers::SnapshotRef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineState {
    /// No pending step yet.
    Init,
    /// A run in progress with no active block.
    Running {
        /// Sorted set of completed step instances.
        completed: Vec<StepInstanceKey>,
        /// Ordered loop frames, unique `loopId` per frame.
        loop_stack: Vec<LoopStackFrame>,
        /// The pending step, mirroring `loop_stack` exactly when `Some`.
        pending: PendingStep,
    },
    /// A run in progress with an active block.
    Blocked {
        /// Sorted set of completed step instances.
        completed: Vec<StepInstanceKey>,
        /// Ordered loop frames, unique `loopId` per frame.
        loop_stack: Vec<LoopStackFrame>,
        /// The pending step, mirroring `loop_stack` exactly when `Some`.
        pending: PendingStep,
        /// The active block.
        blocked: BlockedPayload,
    },
    /// The run has reached a terminal, completed state.
    Complete,
}

impl EngineState {
    /// Returns `true` if a step instance cannot simultaneously be completed
    /// and pending, upholding the invariant named in §3.4.
    #[must_use]
    pub fn upholds_completed_pending_disjoint(&self) -> bool {
        let (completed, pending) = match self {
            Self::Running { completed, pending, .. } | Self::Blocked { completed, pending, .. } => {
                (completed, pending)
            }
            Self::Init | Self::Complete => return true,
        };
        let PendingStep::Some { step_id, loop_path } = pending else {
            return true;
        };
        let pending_key = StepInstanceKey::encode(step_id, loop_path);
        !completed.contains(&pending_key)
    }
}

/// A full execution snapshot: the engine state plus the node it is bound to
/// (§3.4, used to derive `stateToken`'s scope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    /// The node this snapshot is bound to.
    pub node_id: NodeId,
    /// The engine state.
    pub engine_state: EngineState,
}
