// workrail-core/src/core/mod.rs
// ============================================================================
// Module: WorkRail Core Types
// Description: Canonical WorkRail domain model, identifiers, events, engine.
// Purpose: Provide stable, serializable types for workflow execution state.
// Dependencies: serde, serde_json, serde_jcs, sha2, bech32, base64, thiserror
// ============================================================================

//! ## Overview
//! WorkRail core types define branded identifiers, the closed event schema,
//! the domain model (node/edge kinds, blockers, gaps, preferences, outputs),
//! pure projections over the event log, the opaque token codec, the signing
//! keyring, and the advance/block engine itself. These types are the
//! canonical source of truth for the `workrail-store-fs` adapters and the
//! tool entry points in [`crate::api`].

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod canonical;
pub mod engine;
pub mod events;
pub mod identifiers;
pub mod keyring;
pub mod model;
pub mod projections;
pub mod time;
pub mod token;
pub mod workflow;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use canonical::CanonError;
pub use canonical::base32_decode;
pub use canonical::base32_encode;
pub use canonical::base64url_decode;
pub use canonical::base64url_encode;
pub use canonical::bech32m_decode;
pub use canonical::bech32m_encode;
pub use canonical::hash_canonical_ref;
pub use canonical::hex_encode;
pub use canonical::sha256_hex;
pub use canonical::to_canonical_bytes;
pub use engine::CONTEXT_BYTE_BUDGET;
pub use engine::CheckpointResponse;
pub use engine::ContinueOutcome;
pub use engine::ContinueRequest;
pub use engine::ContinueResponse;
pub use engine::EngineDeps;
pub use engine::EngineError;
pub use engine::Intent;
pub use engine::MAX_BLOCKERS;
pub use engine::NextIntent;
pub use engine::ResumeResponse;
pub use engine::StartResponse;
pub use engine::SuppliedOutput;
pub use engine::checkpoint_workflow;
pub use engine::continue_workflow;
pub use engine::list_resumable_sessions;
pub use engine::resume_session;
pub use engine::start_workflow;
pub use events::AdvanceOutcome;
pub use events::CapabilityStatus;
pub use events::DomainEvent;
pub use events::EventData;
pub use events::EventScope;
pub use events::SCHEMA_VERSION;
pub use events::ValidationOutcome;
pub use identifiers::AttemptId;
pub use identifiers::EventId;
pub use identifiers::GapId;
pub use identifiers::LoopFrame;
pub use identifiers::LoopId;
pub use identifiers::NodeId;
pub use identifiers::OutputId;
pub use identifiers::RunId;
pub use identifiers::SessionId;
pub use identifiers::SnapshotRef;
pub use identifiers::StepId;
pub use identifiers::StepInstanceKey;
pub use identifiers::WorkflowHash;
pub use identifiers::WorkflowHashRef;
pub use identifiers::WorkflowId;
pub use keyring::HmacKey;
pub use keyring::KEY_BYTES;
pub use keyring::Keyring;
pub use model::ArtifactRef;
pub use model::Autonomy;
pub use model::BlockedPayload;
pub use model::Blocker;
pub use model::BlockerCode;
pub use model::BlockerPointer;
pub use model::EdgeCause;
pub use model::EdgeKind;
pub use model::EngineState;
pub use model::ExecutionSnapshot;
pub use model::Gap;
pub use model::GapCategory;
pub use model::GapSeverity;
pub use model::LoopStackFrame;
pub use model::NodeKind;
pub use model::Output;
pub use model::OutputChannel;
pub use model::OutputPayload;
pub use model::PendingStep;
pub use model::Preferences;
pub use model::Reason;
pub use model::RetryableBlock;
pub use model::RiskPolicy;
pub use model::TerminalBlock;
pub use projections::CapabilitiesProjection;
pub use projections::DagEdge;
pub use projections::DagNode;
pub use projections::GapRecord;
pub use projections::GapsProjection;
pub use projections::NodeChannelOutputs;
pub use projections::NodeOutputsProjection;
pub use projections::PreferencesProjection;
pub use projections::ProjectionError;
pub use projections::RECAP_WALK_DEPTH_CAP;
pub use projections::Run;
pub use projections::RunDag;
pub use projections::RunStatus;
pub use projections::SessionHealth;
pub use projections::SessionSummary;
pub use projections::latest_advance_outcome_for_run;
pub use projections::project_capabilities;
pub use projections::project_gaps;
pub use projections::project_node_outputs;
pub use projections::project_preferences;
pub use projections::project_run_dag;
pub use projections::project_run_status;
pub use projections::project_session_health;
pub use projections::project_session_summary;
pub use time::Timestamp;
pub use token::TARGET_MAX_LEN;
pub use token::TOKEN_VERSION;
pub use token::TokenError;
pub use token::TokenKind;
pub use token::TokenPayload;
pub use workflow::NextStep;
pub use workflow::PinnedWorkflow;
pub use workflow::StepSpec;
pub use workflow::ValidationCriteria;
