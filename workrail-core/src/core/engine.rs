// workrail-core/src/core/engine.rs
// ============================================================================
// Module: WorkRail Advance/Block Engine
// Description: start_workflow, continue_workflow, checkpoint_workflow, resume_session.
// Purpose: The one place that turns a caller's request plus durable truth into
//          a new batch of events, a new snapshot, and the tokens handed back.
// Dependencies: crate::core::{events, model, projections, token, workflow}, crate::ports
// ============================================================================

//! ## Overview
//! `continue_workflow` implements §4.7's pipeline end to end: boundary
//! validation, token verification, the health-gated lock, context merge,
//! rehydration, effective preferences, validation against the pending step's
//! declared contract, blocking detection, the fixed-order event batch, the
//! snapshot/pin pair, the commit, and the tokens minted in response. Every
//! step that touches durable state goes through the capability traits in
//! [`crate::ports`]; nothing here reads a clock or a filesystem directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::canonical::sha256_hex;
use crate::core::canonical::to_canonical_bytes;
use crate::core::events::AdvanceOutcome;
use crate::core::events::CapabilityStatus;
use crate::core::events::DomainEvent;
use crate::core::events::EventData;
use crate::core::events::EventScope;
use crate::core::events::SCHEMA_VERSION;
use crate::core::events::ValidationOutcome;
use crate::core::identifiers::AttemptId;
use crate::core::identifiers::GapId;
use crate::core::identifiers::LoopFrame;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutputId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::StepInstanceKey;
use crate::core::identifiers::WorkflowId;
use crate::core::keyring::Keyring;
use crate::core::model::ArtifactRef;
use crate::core::model::Autonomy;
use crate::core::model::Blocker;
use crate::core::model::BlockedPayload;
use crate::core::model::BlockerCode;
use crate::core::model::BlockerPointer;
use crate::core::model::EdgeCause;
use crate::core::model::EdgeKind;
use crate::core::model::EngineState;
use crate::core::model::ExecutionSnapshot;
use crate::core::model::Gap;
use crate::core::model::GapCategory;
use crate::core::model::GapSeverity;
use crate::core::model::LoopStackFrame;
use crate::core::model::NodeKind;
use crate::core::model::Output;
use crate::core::model::OutputChannel;
use crate::core::model::OutputPayload;
use crate::core::model::PendingStep;
use crate::core::model::Preferences;
use crate::core::model::Reason;
use crate::core::model::RetryableBlock;
use crate::core::model::TerminalBlock;
use crate::core::projections;
use crate::core::projections::CapabilitiesProjection;
use crate::core::projections::ProjectionError;
use crate::core::projections::SessionSummary;
use crate::core::time::Timestamp;
use crate::core::token;
use crate::core::token::TokenError;
use crate::core::token::TokenKind;
use crate::core::token::TokenPayload;
use crate::core::workflow::NextStep;
use crate::core::workflow::PinnedWorkflow;
use crate::core::workflow::StepSpec;
use crate::ports::CasStoreError;
use crate::ports::CorruptionLocation;
use crate::ports::CorruptionReason;
use crate::ports::Clock;
use crate::ports::ExecutionSessionGate;
use crate::ports::IdFactory;
use crate::ports::LoadedSession;
use crate::ports::PinnedWorkflowStore;
use crate::ports::SessionEventLogStore;
use crate::ports::SessionStoreError;
use crate::ports::SnapshotPin;
use crate::ports::SnapshotStore;
use crate::ports::AppendPlan;

/// Hard cap on the number of blockers recorded against one blocked attempt (§3.5).
pub const MAX_BLOCKERS: usize = 10;

/// Maximum size, in canonical JSON bytes, of a merged context delta (§4.7.1).
pub const CONTEXT_BYTE_BUDGET: usize = 262_144;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// The closed set of failure shapes `continue_workflow` and its siblings can
/// return (§7).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request itself was malformed (§4.7.1).
    #[error("VALIDATION_ERROR: {0}")]
    Validation(String),
    /// The referenced session, run, or node does not exist.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    /// A precondition the caller could retry past was not met (lock busy,
    /// sticky terminal block, truncated log).
    #[error("PRECONDITION_FAILED: {0}")]
    Precondition(String),
    /// Token parsing, verification, or scope checking failed.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// The session event-log store reported a failure.
    #[error(transparent)]
    Store(#[from] SessionStoreError),
    /// A content-addressed store reported a failure.
    #[error(transparent)]
    Cas(#[from] CasStoreError),
    /// A projection reported an invariant violation.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    /// An invariant this module relies on did not hold.
    #[error("INTERNAL_ERROR: {0}")]
    Internal(String),
}

// ============================================================================
// SECTION: Dependencies
// ============================================================================

/// The capability bundle every engine entry point depends on. Built once at
/// the composition root and borrowed for the duration of one call.
pub struct EngineDeps<'a> {
    /// Wall-clock time for event timestamps.
    pub clock: &'a dyn Clock,
    /// Mints session/run/node/attempt/event/output/gap ids.
    pub id_factory: &'a dyn IdFactory,
    /// The active signing keyring.
    pub keyring: &'a Keyring,
    /// The session's append-only event log.
    pub session_log: &'a dyn SessionEventLogStore,
    /// Lock acquisition plus health check.
    pub session_gate: &'a dyn ExecutionSessionGate,
    /// Content-addressed execution snapshots.
    pub snapshot_store: &'a dyn SnapshotStore,
    /// Content-addressed pinned workflows.
    pub workflow_store: &'a dyn PinnedWorkflowStore,
}

// ============================================================================
// SECTION: Request / Response Shapes
// ============================================================================

/// One output the caller supplies alongside an advance (§3.7, §4.7.7).
#[derive(Debug, Clone, Default)]
pub struct SuppliedOutput {
    /// Recap markdown, if any.
    pub notes_markdown: Option<String>,
    /// Artifact references, if any.
    pub artifacts: Vec<ArtifactRef>,
}

/// Which of the two `continue_workflow` intents a request carries (§4.7.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Attempt to advance the pending step.
    Advance,
    /// Re-derive current state and tokens without attempting to advance.
    Rehydrate,
}

/// A `continue_workflow` call (§4.7).
#[derive(Debug, Clone)]
pub struct ContinueRequest {
    /// The caller's current state token.
    pub state_token: String,
    /// Which intent this call carries.
    pub intent: Intent,
    /// Required for [`Intent::Advance`]; forbidden for [`Intent::Rehydrate`].
    pub ack_token: Option<String>,
    /// A context delta to merge in, if any.
    pub context: Option<serde_json::Value>,
    /// The output supplied for the pending step, if any.
    pub output: Option<SuppliedOutput>,
}

/// What the engine recommends the caller do next after a rehydrate (§4.7.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextIntent {
    /// A step is pending; the next call should advance.
    Advance,
    /// Nothing is pending; further calls should keep rehydrating.
    RehydrateOnly,
}

/// The outcome of one `continue_workflow` call (§3.4, §4.7.8).
#[derive(Debug, Clone)]
pub enum ContinueOutcome {
    /// A step is now pending.
    Pending {
        /// The newly pending step's id.
        step_id: StepId,
    },
    /// The attempt produced a block.
    Blocked {
        /// Whether the agent may retry with the returned ack token.
        retryable: bool,
        /// The narrowed blockers (§3.5), capped at [`MAX_BLOCKERS`].
        blockers: Vec<Blocker>,
    },
    /// The run reached its terminal, completed state.
    Complete,
}

/// The response to one `continue_workflow` call.
#[derive(Debug, Clone)]
pub struct ContinueResponse {
    /// The fresh state token bound to the new tip.
    pub state_token: String,
    /// The fresh ack token, present unless the run just completed.
    pub ack_token: Option<String>,
    /// A fresh checkpoint token bound to the new tip.
    pub checkpoint_token: String,
    /// What happened.
    pub outcome: ContinueOutcome,
    /// The effective preferences at the new tip.
    pub preferences: Preferences,
    /// What the caller should do on its next call.
    pub next_intent: NextIntent,
}

/// The response to `start_workflow` (§6).
#[derive(Debug, Clone)]
pub struct StartResponse {
    /// The newly created session.
    pub session_id: SessionId,
    /// The session's first run.
    pub run_id: RunId,
    /// The fresh state token.
    pub state_token: String,
    /// The fresh ack token for the root step.
    pub ack_token: String,
    /// The fresh checkpoint token.
    pub checkpoint_token: String,
    /// The root step now pending.
    pub pending_step_id: StepId,
}

/// The response to `checkpoint_workflow` (§4.8, §6).
#[derive(Debug, Clone)]
pub struct CheckpointResponse {
    /// The durable checkpoint token, safe to persist outside the conversation.
    pub checkpoint_token: String,
}

/// The response to `resume_session` (§4.9, §6).
#[derive(Debug, Clone)]
pub struct ResumeResponse {
    /// A fresh state token bound to the session's preferred tip.
    pub state_token: String,
    /// A fresh ack token, present unless the run is complete.
    pub ack_token: Option<String>,
    /// A fresh checkpoint token.
    pub checkpoint_token: String,
    /// The aggregated recap handed back to re-orient the caller.
    pub summary: SessionSummary,
}

// ============================================================================
// SECTION: Shared Helpers
// ============================================================================

fn dedupe_key(parts: &[&str]) -> String {
    sha256_hex(parts.join("\u{1}").as_bytes())
}

/// Derives a deterministic identifier from its logical-identity components.
///
/// Unlike [`IdFactory`]'s random mints, the same components always yield the
/// same id. This is what lets replaying an identical advance reproduce the
/// same dedupe keys and the same response tokens (§4.7.9, §8) instead of
/// minting a fresh node/output/gap/attempt on every call.
fn derive_id(prefix: &str, parts: &[&str]) -> String {
    let digest = sha256_hex(parts.join("\u{1}").as_bytes());
    format!("{prefix}_{}", &digest[..26])
}

/// Derives a retry attempt's id from the attempt it supersedes, so that a
/// retry chain's ids are stable under replay (§4.7.10).
fn derive_child_attempt_id(parent: &AttemptId) -> AttemptId {
    AttemptId::new(derive_id("att", &[parent.as_str()]))
}

fn build_event(
    id_factory: &dyn IdFactory,
    session_id: &SessionId,
    event_index: u64,
    scope: EventScope,
    recorded_at: Timestamp,
    dedupe_key: String,
    data: EventData,
) -> DomainEvent {
    DomainEvent {
        v: SCHEMA_VERSION,
        event_id: id_factory.new_event_id(),
        event_index,
        session_id: session_id.clone(),
        dedupe_key,
        scope,
        recorded_at,
        data,
    }
}

fn run_scope(run_id: &RunId) -> EventScope {
    EventScope {
        run_id: Some(run_id.clone()),
        node_id: None,
    }
}

fn run_node_scope(run_id: &RunId, node_id: &NodeId) -> EventScope {
    EventScope {
        run_id: Some(run_id.clone()),
        node_id: Some(node_id.clone()),
    }
}

/// Shallow-merges `delta`'s top-level keys into `base`. Arrays and nested
/// objects are replaced wholesale, never deep-merged (§3.6 "Context").
fn shallow_merge(base: serde_json::Value, delta: &serde_json::Value) -> serde_json::Value {
    let serde_json::Value::Object(mut base_map) = base else {
        return delta.clone();
    };
    let serde_json::Value::Object(delta_map) = delta else {
        return serde_json::Value::Object(base_map);
    };
    for (key, value) in delta_map {
        base_map.insert(key.clone(), value.clone());
    }
    serde_json::Value::Object(base_map)
}

fn merged_stored_context(events: &[DomainEvent], run_id: &RunId) -> serde_json::Value {
    let mut context = serde_json::Value::Object(serde_json::Map::new());
    for event in events {
        if event.scope.run_id.as_ref() != Some(run_id) {
            continue;
        }
        if let EventData::ContextSet { context: delta } = &event.data {
            context = shallow_merge(context, delta);
        }
    }
    context
}

fn pending_step_of(state: &EngineState) -> Option<(StepId, Vec<LoopFrame>)> {
    match state {
        EngineState::Running { pending, .. } | EngineState::Blocked { pending, .. } => match pending {
            PendingStep::Some { step_id, loop_path } => Some((step_id.clone(), loop_path.clone())),
            PendingStep::None => None,
        },
        EngineState::Init | EngineState::Complete => None,
    }
}

fn retry_attempt_id_of(state: &EngineState) -> Option<AttemptId> {
    match state {
        EngineState::Blocked {
            blocked: BlockedPayload::RetryableBlock(block),
            ..
        } => Some(block.retry_attempt_id.clone()),
        _ => None,
    }
}

fn outcome_from_state(state: &EngineState, workflow: &PinnedWorkflow) -> ContinueOutcome {
    match state {
        EngineState::Complete => ContinueOutcome::Complete,
        EngineState::Blocked { blocked, .. } => match blocked {
            BlockedPayload::RetryableBlock(block) => ContinueOutcome::Blocked {
                retryable: true,
                blockers: block.blockers.clone(),
            },
            BlockedPayload::TerminalBlock(block) => ContinueOutcome::Blocked {
                retryable: false,
                blockers: block.blockers.clone(),
            },
        },
        EngineState::Running { pending, .. } => match pending {
            PendingStep::Some { step_id, .. } => ContinueOutcome::Pending { step_id: step_id.clone() },
            PendingStep::None => ContinueOutcome::Pending {
                step_id: workflow.root_step_id.clone(),
            },
        },
        EngineState::Init => ContinueOutcome::Pending {
            step_id: workflow.root_step_id.clone(),
        },
    }
}

fn current_recap_output_id(
    outputs: &projections::NodeOutputsProjection,
    node_id: &NodeId,
) -> Option<crate::core::identifiers::OutputId> {
    outputs
        .by_node_and_channel
        .get(&(node_id.clone(), OutputChannel::Recap))?
        .current
        .first()
        .map(|output| output.output_id.clone())
}

// ============================================================================
// SECTION: Validation Against the Pending Step's Contract
// ============================================================================

fn classify_validation(step: &StepSpec, output: Option<&SuppliedOutput>) -> ValidationOutcome {
    if step.output_contract_ref.is_none() && step.validation_criteria.is_none() && step.notes_optional {
        return ValidationOutcome::NotRequired;
    }
    let contract_ref = step.output_contract_ref.clone().unwrap_or_else(|| step.step_id.to_string());

    let Some(output) = output else {
        return ValidationOutcome::Missing { contract_ref };
    };
    let Some(notes) = &output.notes_markdown else {
        if step.notes_optional {
            return ValidationOutcome::Satisfied;
        }
        return ValidationOutcome::Missing { contract_ref };
    };
    if let Some(criteria) = &step.validation_criteria {
        if !criteria.is_satisfied_by(notes) {
            return ValidationOutcome::Invalid { contract_ref };
        }
    }
    ValidationOutcome::Satisfied
}

// ============================================================================
// SECTION: Blocking Reasons
// ============================================================================

fn missing_context_reasons(step: &StepSpec, merged: &serde_json::Value) -> Vec<Reason> {
    step.required_context_keys
        .iter()
        .filter(|key| merged.get(key.as_str()).is_none())
        .map(|key| Reason::MissingContext {
            blocker: Blocker {
                code: BlockerCode::MissingContextKey,
                pointer: BlockerPointer::ContextKey { path: key.clone() },
                message: format!("required context key '{key}' is missing"),
                suggested_fix: None,
            },
        })
        .collect()
}

fn capability_reasons(step: &StepSpec, capabilities: &CapabilitiesProjection, node_id: &NodeId) -> Vec<Reason> {
    step.required_capabilities
        .iter()
        .filter_map(|name| {
            let status = capabilities
                .by_node_and_capability
                .get(&(node_id.clone(), name.clone()))
                .copied()
                .unwrap_or(CapabilityStatus::Unknown);
            let code = match status {
                CapabilityStatus::Available => return None,
                CapabilityStatus::Unknown => BlockerCode::RequiredCapabilityUnknown,
                CapabilityStatus::Unavailable => BlockerCode::RequiredCapabilityUnavailable,
            };
            Some(Reason::CapabilityUnmet {
                blocker: Blocker {
                    code,
                    pointer: BlockerPointer::Capability { name: name.clone() },
                    message: format!("required capability '{name}' is not available"),
                    suggested_fix: None,
                },
            })
        })
        .collect()
}

fn validation_reason(outcome: &ValidationOutcome) -> Option<Reason> {
    match outcome {
        ValidationOutcome::Missing { contract_ref } => Some(Reason::OutputRequirement {
            blocker: Blocker {
                code: BlockerCode::MissingRequiredOutput,
                pointer: BlockerPointer::OutputContract {
                    contract_ref: contract_ref.clone(),
                },
                message: "a required output was not supplied".to_string(),
                suggested_fix: None,
            },
        }),
        ValidationOutcome::Invalid { contract_ref } => Some(Reason::OutputRequirement {
            blocker: Blocker {
                code: BlockerCode::InvalidRequiredOutput,
                pointer: BlockerPointer::OutputContract {
                    contract_ref: contract_ref.clone(),
                },
                message: "the supplied output failed its contract or validation criteria".to_string(),
                suggested_fix: None,
            },
        }),
        ValidationOutcome::Satisfied | ValidationOutcome::NotRequired => None,
    }
}

fn user_only_dependency_reason(step: &StepSpec) -> Option<Reason> {
    if !step.user_only_dependency {
        return None;
    }
    Some(Reason::UserOnlyDependency {
        blocker: Blocker {
            code: BlockerCode::UserOnlyDependency,
            pointer: BlockerPointer::WorkflowStep {
                step_id: step.step_id.clone(),
            },
            message: "this step can only be completed by a human".to_string(),
            suggested_fix: None,
        },
    })
}

fn dedup_and_cap_reasons(reasons: Vec<Reason>) -> Vec<Reason> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for reason in reasons {
        let key = format!("{reason:?}");
        if seen.insert(key) {
            out.push(reason);
        }
        if out.len() >= MAX_BLOCKERS {
            break;
        }
    }
    out
}

fn should_block(autonomy: Autonomy, reasons: &[Reason]) -> bool {
    if reasons.is_empty() {
        return false;
    }
    match autonomy {
        Autonomy::FullAutoNeverStop => false,
        Autonomy::Guided => true,
        Autonomy::FullAutoStopOnUserDeps => reasons.iter().any(Reason::is_user_only_dependency),
    }
}

fn gap_category_of(reason: &Reason) -> GapCategory {
    match reason {
        Reason::UserOnlyDependency { .. } => GapCategory::UserOnlyDependency,
        Reason::OutputRequirement { .. } => GapCategory::ContractViolation,
        Reason::CapabilityUnmet { .. } => GapCategory::CapabilityMissing,
        Reason::MissingContext { .. } | Reason::InvariantViolation { .. } => GapCategory::Unexpected,
    }
}

// ============================================================================
// SECTION: Step Transition
// ============================================================================

enum NextOutcome {
    Pending { step_id: StepId, loop_path: Vec<LoopFrame> },
    Complete,
}

fn compute_next(step: &StepSpec, pending_loop_path: &[LoopFrame]) -> NextOutcome {
    match &step.next {
        NextStep::Terminal => NextOutcome::Complete,
        NextStep::Step { step_id } => NextOutcome::Pending {
            step_id: step_id.clone(),
            loop_path: pending_loop_path.to_vec(),
        },
        NextStep::Loop {
            loop_id,
            body_step_id,
            max_iterations,
            exit_step_id,
        } => {
            let current_iteration = pending_loop_path
                .iter()
                .rev()
                .find(|frame| &frame.loop_id == loop_id)
                .map_or(0, |frame| frame.iteration);
            if current_iteration + 1 >= *max_iterations {
                let mut path = pending_loop_path.to_vec();
                path.retain(|frame| &frame.loop_id != loop_id);
                NextOutcome::Pending {
                    step_id: exit_step_id.clone(),
                    loop_path: path,
                }
            } else {
                let mut path = pending_loop_path.to_vec();
                if let Some(frame) = path.iter_mut().find(|frame| &frame.loop_id == loop_id) {
                    frame.iteration += 1;
                } else {
                    path.push(LoopFrame {
                        loop_id: loop_id.clone(),
                        iteration: 1,
                    });
                }
                NextOutcome::Pending {
                    step_id: body_step_id.clone(),
                    loop_path: path,
                }
            }
        }
    }
}

fn loop_stack_from_path(loop_path: &[LoopFrame]) -> Vec<LoopStackFrame> {
    loop_path
        .iter()
        .map(|frame| LoopStackFrame {
            loop_id: frame.loop_id.clone(),
            iteration: frame.iteration,
            body_index: 0,
        })
        .collect()
}

// ============================================================================
// SECTION: Token Minting
// ============================================================================

struct MintedTokens {
    state_token: String,
    ack_token: Option<String>,
    checkpoint_token: String,
}

fn mint_tokens(
    deps: &EngineDeps<'_>,
    session_id: &SessionId,
    run_id: &RunId,
    node_id: &NodeId,
    attempt_id: Option<&AttemptId>,
) -> Result<MintedTokens, EngineError> {
    let state_payload = TokenPayload {
        kind: TokenKind::Start,
        session_id: session_id.clone(),
        run_id: run_id.clone(),
        node_id: node_id.clone(),
        attempt_id: None,
        workflow_hash_ref: None,
    };
    let state_token = token::sign(deps.keyring, &state_payload)?;

    let ack_token = attempt_id
        .map(|attempt_id| {
            let payload = TokenPayload {
                kind: TokenKind::Ack,
                session_id: session_id.clone(),
                run_id: run_id.clone(),
                node_id: node_id.clone(),
                attempt_id: Some(attempt_id.clone()),
                workflow_hash_ref: None,
            };
            token::sign(deps.keyring, &payload)
        })
        .transpose()?;

    let checkpoint_payload = TokenPayload {
        kind: TokenKind::Checkpoint,
        session_id: session_id.clone(),
        run_id: run_id.clone(),
        node_id: node_id.clone(),
        attempt_id: None,
        workflow_hash_ref: None,
    };
    let checkpoint_token = token::sign(deps.keyring, &checkpoint_payload)?;

    Ok(MintedTokens {
        state_token,
        ack_token,
        checkpoint_token,
    })
}

// ============================================================================
// SECTION: start_workflow
// ============================================================================

/// Starts a brand-new session and run, pinning `workflow` and creating its
/// root node with the workflow's entry step pending (§4.7, §6).
///
/// # Errors
///
/// Returns [`EngineError`] if pinning the workflow, acquiring the gate, or
/// committing the opening event batch fails.
pub fn start_workflow(
    deps: &EngineDeps<'_>,
    workflow_id: WorkflowId,
    workflow: &PinnedWorkflow,
    observation: Option<serde_json::Value>,
) -> Result<StartResponse, EngineError> {
    let workflow_hash = deps.workflow_store.put(workflow)?;
    let session_id = deps.id_factory.new_session_id();
    let run_id = deps.id_factory.new_run_id();
    let root_node_id = deps.id_factory.new_node_id();
    let now = deps.clock.now();

    let snapshot = ExecutionSnapshot {
        node_id: root_node_id.clone(),
        engine_state: EngineState::Running {
            completed: Vec::new(),
            loop_stack: Vec::new(),
            pending: PendingStep::Some {
                step_id: workflow.root_step_id.clone(),
                loop_path: Vec::new(),
            },
        },
    };
    let snapshot_ref = deps.snapshot_store.put(&snapshot)?;

    let mut events = Vec::with_capacity(4);
    events.push(build_event(
        deps.id_factory,
        &session_id,
        0,
        EventScope::default(),
        now,
        dedupe_key(&["session_created", session_id.as_str()]),
        EventData::SessionCreated {
            workflow_id: workflow_id.clone(),
            workflow_hash: workflow_hash.clone(),
        },
    ));
    events.push(build_event(
        deps.id_factory,
        &session_id,
        1,
        run_scope(&run_id),
        now,
        dedupe_key(&["run_started", run_id.as_str()]),
        EventData::RunStarted {
            run_id: run_id.clone(),
            root_node_id: root_node_id.clone(),
        },
    ));
    let mut next_index = 2u64;
    if let Some(data) = observation {
        let bytes = to_canonical_bytes(&data).map_err(|err| EngineError::Validation(err.to_string()))?;
        events.push(build_event(
            deps.id_factory,
            &session_id,
            next_index,
            EventScope::default(),
            now,
            dedupe_key(&["observation_recorded", &sha256_hex(&bytes)]),
            EventData::ObservationRecorded { data },
        ));
        next_index += 1;
    }
    let node_created_index = next_index;
    events.push(build_event(
        deps.id_factory,
        &session_id,
        node_created_index,
        run_node_scope(&run_id, &root_node_id),
        now,
        dedupe_key(&["node_created", root_node_id.as_str()]),
        EventData::NodeCreated {
            node_id: root_node_id.clone(),
            node_kind: NodeKind::Step,
            parent_node_id: None,
            snapshot_ref: snapshot_ref.clone(),
        },
    ));

    let node_created_event_id = events
        .last()
        .expect("node_created was just pushed")
        .event_id
        .clone();

    let plan = AppendPlan {
        events,
        snapshot_pins: vec![SnapshotPin {
            snapshot_ref,
            event_index: node_created_index,
            created_by_event_id: node_created_event_id,
        }],
    };

    let lock = deps.session_gate.acquire_healthy(&session_id)?;
    deps.session_log.append(&lock, &plan)?;
    drop(lock);

    let attempt_id = deps.id_factory.new_attempt_id();
    let tokens = mint_tokens(deps, &session_id, &run_id, &root_node_id, Some(&attempt_id))?;

    Ok(StartResponse {
        session_id,
        run_id,
        state_token: tokens.state_token,
        ack_token: tokens.ack_token.ok_or_else(|| EngineError::Internal("ack token was not minted".to_string()))?,
        checkpoint_token: tokens.checkpoint_token,
        pending_step_id: workflow.root_step_id.clone(),
    })
}

// ============================================================================
// SECTION: continue_workflow
// ============================================================================

/// One pending event, not yet assigned an `eventIndex` or `dedupeKey`.
struct PendingEvent {
    scope: EventScope,
    data: EventData,
    dedupe_parts: Vec<String>,
}

/// Attempts to advance (or rehydrate) the session's pending step (§4.7).
///
/// # Errors
///
/// Returns [`EngineError::Validation`] on a malformed request,
/// [`EngineError::Token`] on token failures, [`EngineError::NotFound`] if the
/// scoped run or node does not exist, and the store/cas/projection variants
/// on their respective underlying failures.
#[allow(clippy::too_many_lines)]
pub fn continue_workflow(deps: &EngineDeps<'_>, request: &ContinueRequest) -> Result<ContinueResponse, EngineError> {
    // --- Step 1: boundary validation -----------------------------------
    if matches!(request.intent, Intent::Rehydrate) && (request.ack_token.is_some() || request.output.is_some() || request.context.is_some()) {
        return Err(EngineError::Validation(
            "a rehydrate intent must not carry an ack token, context, or output".to_string(),
        ));
    }
    if matches!(request.intent, Intent::Advance) && request.ack_token.is_none() {
        return Err(EngineError::Validation("an advance intent requires an ack token".to_string()));
    }
    let context_delta = request.context.clone().unwrap_or_else(|| serde_json::json!({}));
    if !context_delta.is_object() {
        return Err(EngineError::Validation("context must be a JSON object".to_string()));
    }
    let context_bytes = to_canonical_bytes(&context_delta).map_err(|err| EngineError::Validation(err.to_string()))?;
    if context_bytes.len() > CONTEXT_BYTE_BUDGET {
        return Err(EngineError::Validation(format!(
            "context of {} bytes exceeds the {CONTEXT_BYTE_BUDGET}-byte budget",
            context_bytes.len()
        )));
    }

    // --- Step 2: token verification --------------------------------------
    let state_payload = token::parse(deps.keyring, TokenKind::Start, &request.state_token)?;
    let ack_payload = match &request.ack_token {
        Some(raw) => {
            let payload = token::parse(deps.keyring, TokenKind::Ack, raw)?;
            payload.ensure_scope(&state_payload.session_id, &state_payload.run_id, &state_payload.node_id)?;
            Some(payload)
        }
        None => None,
    };

    // --- Step 3: health + lock, reload durable truth ----------------------
    let lock = deps.session_gate.acquire_healthy(&state_payload.session_id)?;
    let events = match deps.session_log.load(&state_payload.session_id)? {
        LoadedSession::Valid { events } => events,
        LoadedSession::Truncated { tail_reason, .. } => {
            return Err(EngineError::Precondition(format!("session log tail did not validate: {tail_reason:?}")));
        }
    };

    let workflow_hash = events
        .iter()
        .find_map(|event| match &event.data {
            EventData::SessionCreated { workflow_hash, .. } => Some(workflow_hash.clone()),
            _ => None,
        })
        .ok_or_else(|| EngineError::Internal("session log has no session_created event".to_string()))?;
    let workflow = deps
        .workflow_store
        .get(&workflow_hash)?
        .ok_or_else(|| EngineError::Internal("pinned workflow not found for session's workflow hash".to_string()))?;

    let dag = projections::project_run_dag(&events)?;
    let run = dag
        .runs_by_id
        .get(&state_payload.run_id)
        .ok_or_else(|| EngineError::NotFound(format!("run {} not found", state_payload.run_id)))?;
    let current_node = run
        .nodes_by_id
        .get(&state_payload.node_id)
        .ok_or_else(|| EngineError::NotFound(format!("node {} not found", state_payload.node_id)))?;
    let snapshot = deps
        .snapshot_store
        .get(&current_node.snapshot_ref)?
        .ok_or_else(|| EngineError::Internal("execution snapshot not found for current node".to_string()))?;

    // --- Step 4: context merge --------------------------------------------
    let merged_context = shallow_merge(merged_stored_context(&events, &state_payload.run_id), &context_delta);

    // --- Step 5: rehydrate path --------------------------------------------
    if matches!(request.intent, Intent::Rehydrate) {
        drop(lock);
        let preferences = projections::project_preferences(&events).effective_at(&state_payload.node_id);
        let pending = pending_step_of(&snapshot.engine_state);
        let next_intent = if pending.is_some() { NextIntent::Advance } else { NextIntent::RehydrateOnly };
        let attempt_id = retry_attempt_id_of(&snapshot.engine_state);
        let tokens = mint_tokens(deps, &state_payload.session_id, &state_payload.run_id, &state_payload.node_id, attempt_id.as_ref())?;
        return Ok(ContinueResponse {
            state_token: tokens.state_token,
            ack_token: tokens.ack_token,
            checkpoint_token: tokens.checkpoint_token,
            outcome: outcome_from_state(&snapshot.engine_state, &workflow),
            preferences,
            next_intent,
        });
    }

    // --- Step 6: effective preferences, fresh-vs-retry classification ----
    if matches!(current_node.node_kind, NodeKind::BlockedAttempt)
        && matches!(
            snapshot.engine_state,
            EngineState::Blocked {
                blocked: BlockedPayload::TerminalBlock(_),
                ..
            }
        )
    {
        return Err(EngineError::Precondition(
            "this node carries a terminal block; it cannot be retried".to_string(),
        ));
    }

    let effective_preferences = projections::project_preferences(&events).effective_at(&state_payload.node_id);

    let base_node_id = if matches!(current_node.node_kind, NodeKind::BlockedAttempt) {
        current_node
            .parent_node_id
            .clone()
            .ok_or_else(|| EngineError::Internal("a blocked attempt node must have a parent".to_string()))?
    } else {
        state_payload.node_id.clone()
    };

    let Some((pending_step_id, pending_loop_path)) = pending_step_of(&snapshot.engine_state) else {
        return Err(EngineError::Precondition("no step is currently pending on this node".to_string()));
    };
    let step = workflow
        .step(&pending_step_id)
        .ok_or_else(|| EngineError::Internal(format!("workflow does not declare step {pending_step_id}")))?;

    let (completed, loop_stack) = match &snapshot.engine_state {
        EngineState::Running { completed, loop_stack, .. } | EngineState::Blocked { completed, loop_stack, .. } => {
            (completed.clone(), loop_stack.clone())
        }
        EngineState::Init | EngineState::Complete => (Vec::new(), Vec::new()),
    };

    // --- Step 7: validation -------------------------------------------------
    let validation_outcome = classify_validation(step, request.output.as_ref());

    // --- Step 8: blocking detection -----------------------------------------
    let capabilities = projections::project_capabilities(&events);
    let mut reasons = Vec::new();
    reasons.extend(missing_context_reasons(step, &merged_context));
    reasons.extend(capability_reasons(step, &capabilities, &base_node_id));
    if let Some(reason) = validation_reason(&validation_outcome) {
        reasons.push(reason);
    }
    if let Some(reason) = user_only_dependency_reason(step) {
        reasons.push(reason);
    }
    let reasons = dedup_and_cap_reasons(reasons);
    let blocked = should_block(effective_preferences.autonomy, &reasons);

    // --- Step 9: event batch, fixed order a-h -------------------------------
    // Every id below is derived from the attempt this call acts on rather
    // than freshly minted, so that replaying an identical
    // (stateToken, ackToken, context, output) reproduces the same ids, the
    // same dedupeKeys, and therefore a no-op append and identical tokens
    // (§4.7.9, §4.7.10, §8).
    let acting_attempt_id = ack_payload
        .as_ref()
        .and_then(|payload| payload.attempt_id.clone())
        .ok_or_else(|| EngineError::Internal("an advance intent's ack token must carry an attempt id".to_string()))?;

    let outputs_projection = projections::project_node_outputs(&events)?;
    let mut pending_events: Vec<PendingEvent> = Vec::new();
    let scope_on_base = run_node_scope(&state_payload.run_id, &base_node_id);

    // (a) context_set
    if context_delta.as_object().is_some_and(|object| !object.is_empty()) {
        pending_events.push(PendingEvent {
            scope: scope_on_base.clone(),
            data: EventData::ContextSet { context: context_delta.clone() },
            dedupe_parts: vec![
                "context_set".to_string(),
                state_payload.run_id.to_string(),
                sha256_hex(&context_bytes),
            ],
        });
    }

    // (c) node_output_appended (capability observation is out of this
    // request's surface; there is nothing to emit for step (b))
    if let Some(output) = &request.output {
        if let Some(markdown) = &output.notes_markdown {
            let output_id = OutputId::new(derive_id("out", &[base_node_id.as_str(), acting_attempt_id.as_str(), "recap"]));
            let supersedes = current_recap_output_id(&outputs_projection, &base_node_id);
            pending_events.push(PendingEvent {
                scope: scope_on_base.clone(),
                dedupe_parts: vec!["node_output".to_string(), base_node_id.to_string(), "recap".to_string(), output_id.to_string()],
                data: EventData::NodeOutputAppended {
                    output: Output {
                        output_id,
                        node_id: base_node_id.clone(),
                        channel: OutputChannel::Recap,
                        payload: OutputPayload::Notes { markdown: markdown.clone() },
                        supersedes_output_id: supersedes,
                    },
                },
            });
        }
        for (position, artifact) in output.artifacts.iter().enumerate() {
            let output_id = OutputId::new(derive_id(
                "out",
                &[base_node_id.as_str(), acting_attempt_id.as_str(), "artifact", &position.to_string()],
            ));
            pending_events.push(PendingEvent {
                scope: scope_on_base.clone(),
                dedupe_parts: vec![
                    "node_output".to_string(),
                    base_node_id.to_string(),
                    "artifact".to_string(),
                    output_id.to_string(),
                ],
                data: EventData::NodeOutputAppended {
                    output: Output {
                        output_id,
                        node_id: base_node_id.clone(),
                        channel: OutputChannel::Artifact,
                        payload: OutputPayload::ArtifactRef { artifact_ref: artifact.clone() },
                        supersedes_output_id: None,
                    },
                },
            });
        }
    }

    // (d) validation_performed: only on a retry's success or on any blocked
    // outcome; a fresh successful advance never emits one (§4.7.9(c), §9(b)).
    let current_node_was_blocked_attempt = matches!(current_node.node_kind, NodeKind::BlockedAttempt);
    if (current_node_was_blocked_attempt && !blocked) || blocked {
        pending_events.push(PendingEvent {
            scope: scope_on_base.clone(),
            dedupe_parts: vec![
                "validation_performed".to_string(),
                base_node_id.to_string(),
                acting_attempt_id.to_string(),
                format!("{validation_outcome:?}"),
            ],
            data: EventData::ValidationPerformed {
                outcome: validation_outcome.clone(),
            },
        });
    }

    // (e) gap_recorded for reasons a FullAutoNeverStop policy suppressed
    if !blocked && effective_preferences.autonomy == Autonomy::FullAutoNeverStop {
        for (position, reason) in reasons.iter().enumerate() {
            let gap_id = GapId::new(derive_id(
                "gap",
                &[base_node_id.as_str(), acting_attempt_id.as_str(), &position.to_string()],
            ));
            pending_events.push(PendingEvent {
                scope: scope_on_base.clone(),
                dedupe_parts: vec!["gap_recorded".to_string(), gap_id.to_string()],
                data: EventData::GapRecorded {
                    gap: Gap {
                        gap_id,
                        severity: GapSeverity::Critical,
                        category: gap_category_of(reason),
                        message: reason.blocker().message.clone(),
                        resolves_gap_id: None,
                    },
                },
            });
        }
    }

    // (f)/(g)/(h): node_created, edge_created, advance_recorded
    let new_node_id = NodeId::new(derive_id("node", &[base_node_id.as_str(), acting_attempt_id.as_str()]));
    let is_tip = run.tip_node_ids.contains(&base_node_id);
    let base_has_prior_attempt = run.nodes_by_id.values().any(|node| node.parent_node_id.as_ref() == Some(&base_node_id));
    let cause = if !is_tip {
        EdgeCause::NonTipAdvance
    } else if base_has_prior_attempt {
        EdgeCause::IntentionalFork
    } else {
        EdgeCause::IdempotentReplay
    };

    let (node_kind, engine_state, advance_outcome, next_pending_step_id, fresh_attempt_id) = if blocked {
        let retry_attempt_id = derive_child_attempt_id(&acting_attempt_id);
        let blockers: Vec<Blocker> = reasons.iter().map(|reason| reason.blocker().clone()).collect();
        let engine_state = EngineState::Blocked {
            completed: completed.clone(),
            loop_stack: loop_stack.clone(),
            pending: PendingStep::Some {
                step_id: pending_step_id.clone(),
                loop_path: pending_loop_path.clone(),
            },
            blocked: BlockedPayload::RetryableBlock(RetryableBlock {
                reason: reasons.clone(),
                retry_attempt_id: retry_attempt_id.clone(),
                validation_ref: None,
                blockers,
            }),
        };
        (
            NodeKind::BlockedAttempt,
            engine_state,
            AdvanceOutcome::RetryableBlock,
            Some(pending_step_id.clone()),
            Some(retry_attempt_id),
        )
    } else {
        let mut completed = completed;
        completed.push(StepInstanceKey::encode(&pending_step_id, &pending_loop_path));
        match compute_next(step, &pending_loop_path) {
            NextOutcome::Complete => (NodeKind::Step, EngineState::Complete, AdvanceOutcome::Complete, None, None),
            NextOutcome::Pending { step_id, loop_path } => {
                let engine_state = EngineState::Running {
                    completed,
                    loop_stack: loop_stack_from_path(&loop_path),
                    pending: PendingStep::Some {
                        step_id: step_id.clone(),
                        loop_path,
                    },
                };
                let attempt_id = AttemptId::new(derive_id("att", &[new_node_id.as_str()]));
                (NodeKind::Step, engine_state, AdvanceOutcome::Advanced, Some(step_id), Some(attempt_id))
            }
        }
    };

    let continue_outcome = match (&advance_outcome, blocked) {
        (AdvanceOutcome::Complete, _) => ContinueOutcome::Complete,
        (_, true) => ContinueOutcome::Blocked {
            retryable: true,
            blockers: reasons.iter().map(|reason| reason.blocker().clone()).collect(),
        },
        (_, false) => ContinueOutcome::Pending {
            step_id: next_pending_step_id
                .clone()
                .unwrap_or_else(|| workflow.root_step_id.clone()),
        },
    };

    let snapshot_out = ExecutionSnapshot {
        node_id: new_node_id.clone(),
        engine_state,
    };
    let snapshot_ref_out = deps.snapshot_store.put(&snapshot_out)?;

    let node_created_position = pending_events.len();
    pending_events.push(PendingEvent {
        scope: run_node_scope(&state_payload.run_id, &new_node_id),
        dedupe_parts: vec!["node_created".to_string(), new_node_id.to_string()],
        data: EventData::NodeCreated {
            node_id: new_node_id.clone(),
            node_kind,
            parent_node_id: Some(base_node_id.clone()),
            snapshot_ref: snapshot_ref_out.clone(),
        },
    });
    pending_events.push(PendingEvent {
        scope: run_node_scope(&state_payload.run_id, &new_node_id),
        dedupe_parts: vec!["edge_created".to_string(), base_node_id.to_string(), new_node_id.to_string()],
        data: EventData::EdgeCreated {
            from_node_id: base_node_id.clone(),
            to_node_id: new_node_id.clone(),
            edge_kind: EdgeKind::AckedStep,
            cause,
        },
    });
    pending_events.push(PendingEvent {
        scope: run_node_scope(&state_payload.run_id, &new_node_id),
        dedupe_parts: vec!["advance_recorded".to_string(), new_node_id.to_string()],
        data: EventData::AdvanceRecorded { outcome: advance_outcome },
    });

    let tail_len = events.len() as u64;
    let now = deps.clock.now();
    let domain_events: Vec<DomainEvent> = pending_events
        .into_iter()
        .enumerate()
        .map(|(position, pending)| {
            let dedupe_parts: Vec<&str> = pending.dedupe_parts.iter().map(String::as_str).collect();
            build_event(
                deps.id_factory,
                &state_payload.session_id,
                tail_len + position as u64,
                pending.scope,
                now,
                dedupe_key(&dedupe_parts),
                pending.data,
            )
        })
        .collect();
    let node_created_event_id = domain_events[node_created_position].event_id.clone();

    let plan = AppendPlan {
        events: domain_events,
        snapshot_pins: vec![SnapshotPin {
            snapshot_ref: snapshot_ref_out,
            event_index: tail_len + node_created_position as u64,
            created_by_event_id: node_created_event_id,
        }],
    };

    // --- Step 11: commit -----------------------------------------------------
    match deps.session_log.append(&lock, &plan) {
        Ok(()) => {}
        Err(SessionStoreError::LockBusy { retry_after_ms }) => {
            return Err(EngineError::Precondition(format!("session lock busy, retry after {retry_after_ms}ms")));
        }
        Err(SessionStoreError::CorruptionDetected { location, reason }) => {
            drop(lock);
            return terminal_corruption_response(deps, &state_payload, location, reason);
        }
        Err(other) => return Err(EngineError::from(other)),
    }
    drop(lock);

    // --- Step 12: mint response tokens ---------------------------------------
    let tokens = mint_tokens(deps, &state_payload.session_id, &state_payload.run_id, &new_node_id, fresh_attempt_id.as_ref())?;

    Ok(ContinueResponse {
        state_token: tokens.state_token,
        ack_token: tokens.ack_token,
        checkpoint_token: tokens.checkpoint_token,
        outcome: continue_outcome,
        preferences: effective_preferences,
        next_intent: NextIntent::Advance,
    })
}

fn terminal_corruption_response(
    deps: &EngineDeps<'_>,
    state_payload: &TokenPayload,
    location: CorruptionLocation,
    reason: CorruptionReason,
) -> Result<ContinueResponse, EngineError> {
    let blocker = Blocker {
        code: BlockerCode::StorageCorruptionDetected,
        pointer: BlockerPointer::WorkflowStep {
            step_id: StepId::new("unknown"),
        },
        message: format!("storage corruption detected ({location:?}, {reason:?}); this session cannot advance further"),
        suggested_fix: None,
    };
    let tokens = mint_tokens(
        deps,
        &state_payload.session_id,
        &state_payload.run_id,
        &state_payload.node_id,
        None,
    )?;
    Ok(ContinueResponse {
        state_token: tokens.state_token,
        ack_token: tokens.ack_token,
        checkpoint_token: tokens.checkpoint_token,
        outcome: ContinueOutcome::Blocked {
            retryable: false,
            blockers: vec![blocker],
        },
        preferences: Preferences::guided_conservative(),
        next_intent: NextIntent::RehydrateOnly,
    })
}

// ============================================================================
// SECTION: checkpoint_workflow
// ============================================================================

/// Records a durable checkpoint node off the tip `state_token` scopes to,
/// and mints a fresh checkpoint token for it (§4.8).
///
/// Unlike an advance, a checkpoint never touches the pending step: the new
/// node carries the same snapshot content as its parent, just re-addressed
/// under a fresh node id so the checkpoint edge has somewhere to land.
///
/// # Errors
///
/// Returns [`EngineError`] on token, store, or projection failures.
pub fn checkpoint_workflow(deps: &EngineDeps<'_>, state_token: &str) -> Result<CheckpointResponse, EngineError> {
    let state_payload = token::parse(deps.keyring, TokenKind::Start, state_token)?;
    let lock = deps.session_gate.acquire_healthy(&state_payload.session_id)?;
    let events = match deps.session_log.load(&state_payload.session_id)? {
        LoadedSession::Valid { events } => events,
        LoadedSession::Truncated { tail_reason, .. } => {
            return Err(EngineError::Precondition(format!("session log tail did not validate: {tail_reason:?}")));
        }
    };

    let dag = projections::project_run_dag(&events)?;
    let run = dag
        .runs_by_id
        .get(&state_payload.run_id)
        .ok_or_else(|| EngineError::NotFound(format!("run {} not found", state_payload.run_id)))?;
    let current_node = run
        .nodes_by_id
        .get(&state_payload.node_id)
        .ok_or_else(|| EngineError::NotFound(format!("node {} not found", state_payload.node_id)))?;
    let snapshot = deps
        .snapshot_store
        .get(&current_node.snapshot_ref)?
        .ok_or_else(|| EngineError::Internal("execution snapshot not found for current node".to_string()))?;

    let checkpoint_node_id = deps.id_factory.new_node_id();
    let snapshot_out = ExecutionSnapshot {
        node_id: checkpoint_node_id.clone(),
        engine_state: snapshot.engine_state,
    };
    let snapshot_ref_out = deps.snapshot_store.put(&snapshot_out)?;

    let tail_len = events.len() as u64;
    let now = deps.clock.now();
    let node_created = build_event(
        deps.id_factory,
        &state_payload.session_id,
        tail_len,
        run_node_scope(&state_payload.run_id, &checkpoint_node_id),
        now,
        dedupe_key(&["node_created", checkpoint_node_id.as_str()]),
        EventData::NodeCreated {
            node_id: checkpoint_node_id.clone(),
            node_kind: NodeKind::Checkpoint,
            parent_node_id: Some(state_payload.node_id.clone()),
            snapshot_ref: snapshot_ref_out.clone(),
        },
    );
    let node_created_event_id = node_created.event_id.clone();
    let edge_created = build_event(
        deps.id_factory,
        &state_payload.session_id,
        tail_len + 1,
        run_node_scope(&state_payload.run_id, &checkpoint_node_id),
        now,
        dedupe_key(&[
            "edge_created",
            state_payload.node_id.as_str(),
            checkpoint_node_id.as_str(),
        ]),
        EventData::EdgeCreated {
            from_node_id: state_payload.node_id.clone(),
            to_node_id: checkpoint_node_id.clone(),
            edge_kind: EdgeKind::Checkpoint,
            cause: EdgeCause::CheckpointCreated,
        },
    );

    let plan = AppendPlan {
        events: vec![node_created, edge_created],
        snapshot_pins: vec![SnapshotPin {
            snapshot_ref: snapshot_ref_out,
            event_index: tail_len,
            created_by_event_id: node_created_event_id,
        }],
    };
    deps.session_log.append(&lock, &plan)?;
    drop(lock);

    let tokens = mint_tokens(deps, &state_payload.session_id, &state_payload.run_id, &checkpoint_node_id, None)?;
    Ok(CheckpointResponse {
        checkpoint_token: tokens.checkpoint_token,
    })
}

// ============================================================================
// SECTION: resume_session
// ============================================================================

/// Re-derives fresh tokens for a session's preferred tip from a previously
/// minted checkpoint token (§4.9).
///
/// # Errors
///
/// Returns [`EngineError`] on token, store, or projection failures.
pub fn resume_session(deps: &EngineDeps<'_>, checkpoint_token: &str, recap_byte_cap: usize) -> Result<ResumeResponse, EngineError> {
    let payload = token::parse(deps.keyring, TokenKind::Checkpoint, checkpoint_token)?;
    let events = match deps.session_log.load(&payload.session_id)? {
        LoadedSession::Valid { events } => events,
        LoadedSession::Truncated { tail_reason, .. } => {
            return Err(EngineError::Precondition(format!("session log tail did not validate: {tail_reason:?}")));
        }
    };

    let summary = projections::project_session_summary(&payload.session_id, &events, recap_byte_cap)?;
    let dag = projections::project_run_dag(&events)?;
    let Some(run_id) = &summary.most_active_run_id else {
        return Err(EngineError::NotFound("session has no runs to resume".to_string()));
    };
    let run = &dag.runs_by_id[run_id];
    let Some(tip_node_id) = &summary.preferred_tip_node_id else {
        return Err(EngineError::NotFound("session has no preferred tip to resume".to_string()));
    };
    let node = &run.nodes_by_id[tip_node_id];
    let snapshot = deps
        .snapshot_store
        .get(&node.snapshot_ref)?
        .ok_or_else(|| EngineError::Internal("execution snapshot not found for preferred tip".to_string()))?;

    let attempt_id = match &snapshot.engine_state {
        EngineState::Blocked {
            blocked: BlockedPayload::RetryableBlock(block),
            ..
        } => Some(block.retry_attempt_id.clone()),
        EngineState::Running { .. } => Some(deps.id_factory.new_attempt_id()),
        _ => None,
    };

    let tokens = mint_tokens(deps, &payload.session_id, run_id, tip_node_id, attempt_id.as_ref())?;
    Ok(ResumeResponse {
        state_token: tokens.state_token,
        ack_token: tokens.ack_token,
        checkpoint_token: tokens.checkpoint_token,
        summary,
    })
}

// ============================================================================
// SECTION: list_resumable_sessions
// ============================================================================

/// Ranks candidate sessions for the `list_workflows`-adjacent resume browser
/// (§4.9). Pure: enumerating session directories is the caller's concern;
/// this only projects and orders whatever `(session_id, events)` pairs it is
/// handed. Unhealthy sessions sort last and still appear, so a corrupt
/// session is never silently hidden from the list.
///
/// # Errors
///
/// Returns [`EngineError`] only if a projection panics on malformed input
/// the caller already validated; in practice every candidate's summary is
/// computed independently and an unhealthy one simply ranks last rather
/// than aborting the whole call.
pub fn list_resumable_sessions(
    candidates: &[(SessionId, Vec<DomainEvent>)],
    recap_byte_cap: usize,
) -> Result<Vec<SessionSummary>, EngineError> {
    let mut summaries = Vec::with_capacity(candidates.len());
    for (session_id, events) in candidates {
        summaries.push(projections::project_session_summary(session_id, events, recap_byte_cap)?);
    }
    summaries.sort_by(|a, b| {
        let rank = |summary: &SessionSummary| matches!(summary.health, crate::core::projections::SessionHealth::Healthy);
        rank(b).cmp(&rank(a)).then_with(|| a.session_id.as_str().cmp(b.session_id.as_str()))
    });
    Ok(summaries)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifiers::LoopId;
    use crate::core::model::RiskPolicy;
    use crate::core::workflow::ValidationCriteria;

    fn step(step_id: &str, next: NextStep) -> StepSpec {
        StepSpec {
            step_id: StepId::new(step_id),
            required_context_keys: Vec::new(),
            required_capabilities: Vec::new(),
            user_only_dependency: false,
            output_contract_ref: None,
            validation_criteria: None,
            notes_optional: true,
            next,
        }
    }

    #[test]
    fn shallow_merge_replaces_top_level_keys_and_arrays() {
        let base = serde_json::json!({"a": 1, "b": [1, 2], "c": {"x": 1}});
        let delta = serde_json::json!({"b": [9], "c": {"y": 2}});
        let merged = shallow_merge(base, &delta);
        assert_eq!(merged["a"], serde_json::json!(1));
        assert_eq!(merged["b"], serde_json::json!([9]));
        assert_eq!(merged["c"], serde_json::json!({"y": 2}));
    }

    #[test]
    fn classify_validation_requires_notes_unless_optional() {
        let mut required = step("s1", NextStep::Terminal);
        required.notes_optional = false;
        assert_eq!(
            classify_validation(&required, None),
            ValidationOutcome::Missing {
                contract_ref: "s1".to_string()
            }
        );

        let optional = step("s2", NextStep::Terminal);
        assert_eq!(classify_validation(&optional, None), ValidationOutcome::NotRequired);
    }

    #[test]
    fn classify_validation_checks_criteria() {
        let mut gated = step("s1", NextStep::Terminal);
        gated.notes_optional = false;
        gated.validation_criteria = Some(ValidationCriteria::ContainsSubstring {
            needle: "pass".to_string(),
        });

        let failing = SuppliedOutput {
            notes_markdown: Some("still working".to_string()),
            artifacts: Vec::new(),
        };
        assert_eq!(
            classify_validation(&gated, Some(&failing)),
            ValidationOutcome::Invalid {
                contract_ref: "s1".to_string()
            }
        );

        let passing = SuppliedOutput {
            notes_markdown: Some("tests pass".to_string()),
            artifacts: Vec::new(),
        };
        assert_eq!(classify_validation(&gated, Some(&passing)), ValidationOutcome::Satisfied);
    }

    #[test]
    fn dedup_and_cap_reasons_drops_duplicates_and_caps() {
        let blocker = Blocker {
            code: BlockerCode::MissingContextKey,
            pointer: BlockerPointer::ContextKey { path: "x".to_string() },
            message: "missing x".to_string(),
            suggested_fix: None,
        };
        let reasons = vec![
            Reason::MissingContext { blocker: blocker.clone() },
            Reason::MissingContext { blocker },
        ];
        assert_eq!(dedup_and_cap_reasons(reasons).len(), 1);
    }

    #[test]
    fn should_block_respects_autonomy() {
        let blocker = Blocker {
            code: BlockerCode::MissingContextKey,
            pointer: BlockerPointer::ContextKey { path: "x".to_string() },
            message: "missing x".to_string(),
            suggested_fix: None,
        };
        let reasons = vec![Reason::MissingContext { blocker }];
        assert!(!should_block(Autonomy::FullAutoNeverStop, &reasons));
        assert!(should_block(Autonomy::Guided, &reasons));
        assert!(!should_block(Autonomy::FullAutoStopOnUserDeps, &reasons));
    }

    #[test]
    fn compute_next_exits_loop_at_max_iterations() {
        let looping = step(
            "body",
            NextStep::Loop {
                loop_id: LoopId::new("retry_loop"),
                body_step_id: StepId::new("body"),
                max_iterations: 2,
                exit_step_id: StepId::new("exit"),
            },
        );
        let first = compute_next(&looping, &[]);
        let NextOutcome::Pending { step_id, loop_path } = first else {
            panic!("expected pending");
        };
        assert_eq!(step_id.as_str(), "body");
        assert_eq!(loop_path[0].iteration, 1);

        let second = compute_next(&looping, &loop_path);
        let NextOutcome::Pending { step_id, loop_path } = second else {
            panic!("expected pending");
        };
        assert_eq!(step_id.as_str(), "exit");
        assert!(loop_path.is_empty());
    }

    #[test]
    fn preferences_default_to_guided_conservative() {
        let preferences = Preferences::guided_conservative();
        assert_eq!(preferences.autonomy, Autonomy::Guided);
        assert_eq!(preferences.risk_policy, RiskPolicy::Conservative);
    }
}
