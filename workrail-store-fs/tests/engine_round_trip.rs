// workrail-store-fs/tests/engine_round_trip.rs
// ============================================================================
// Test: Engine Round Trip Against Real Filesystem Adapters
// Description: Drives start_workflow/continue_workflow through the fs-backed
//              ports implementations end to end, mirroring the teacher's
//              integration tests that exercise its SQLite store directly
//              rather than only against in-memory fakes.
// ============================================================================

use std::collections::BTreeMap;

use workrail_core::core::engine;
use workrail_core::core::engine::ContinueOutcome;
use workrail_core::core::engine::ContinueRequest;
use workrail_core::core::engine::EngineDeps;
use workrail_core::core::engine::Intent;
use workrail_core::core::engine::SuppliedOutput;
use workrail_core::core::events::EventData;
use workrail_core::core::identifiers::StepId;
use workrail_core::core::identifiers::WorkflowId;
use workrail_core::core::keyring::HmacKey;
use workrail_core::core::keyring::Keyring;
use workrail_core::core::keyring::KEY_BYTES;
use workrail_core::core::workflow::NextStep;
use workrail_core::core::workflow::PinnedWorkflow;
use workrail_core::core::workflow::StepSpec;
use workrail_core::ports::LoadedSession;
use workrail_core::ports::SessionEventLogStore;
use workrail_store_fs::cas::FsPinnedWorkflowStore;
use workrail_store_fs::cas::FsSnapshotStore;
use workrail_store_fs::clock::SystemClock;
use workrail_store_fs::filesystem::LocalFileSystem;
use workrail_store_fs::ids::RandomIdFactory;
use workrail_store_fs::lock::FsExecutionSessionGate;
use workrail_store_fs::lock::FsSessionLock;
use workrail_store_fs::session_log::FsSessionEventLogStore;

fn two_step_workflow() -> PinnedWorkflow {
    let first = StepId::new("first_step");
    let second = StepId::new("second_step");
    let mut steps = BTreeMap::new();
    steps.insert(
        first.clone(),
        StepSpec {
            step_id: first.clone(),
            required_context_keys: Vec::new(),
            required_capabilities: Vec::new(),
            user_only_dependency: false,
            output_contract_ref: None,
            validation_criteria: None,
            notes_optional: true,
            next: NextStep::Step { step_id: second.clone() },
        },
    );
    steps.insert(
        second.clone(),
        StepSpec {
            step_id: second.clone(),
            required_context_keys: Vec::new(),
            required_capabilities: Vec::new(),
            user_only_dependency: false,
            output_contract_ref: None,
            validation_criteria: None,
            notes_optional: true,
            next: NextStep::Terminal,
        },
    );
    PinnedWorkflow {
        workflow_id: WorkflowId::new("wf_two_step"),
        root_step_id: first,
        steps,
    }
}

fn single_step_workflow() -> PinnedWorkflow {
    let step_id = StepId::new("only_step");
    let mut steps = BTreeMap::new();
    steps.insert(
        step_id.clone(),
        StepSpec {
            step_id: step_id.clone(),
            required_context_keys: Vec::new(),
            required_capabilities: Vec::new(),
            user_only_dependency: false,
            output_contract_ref: None,
            validation_criteria: None,
            notes_optional: true,
            next: NextStep::Terminal,
        },
    );
    PinnedWorkflow {
        workflow_id: WorkflowId::new("wf_single_step"),
        root_step_id: step_id,
        steps,
    }
}

#[test]
fn start_then_advance_completes_the_run_on_disk() {
    let root = tempfile::tempdir().expect("tempdir");
    let fs = LocalFileSystem::new();
    let sessions_root = root.path().join("sessions");
    let snapshots_root = root.path().join("snapshots");
    let workflows_root = root.path().join("workflows");

    let session_log = FsSessionEventLogStore::new(&fs, sessions_root.clone());
    let lock = FsSessionLock::new(&fs, sessions_root);
    let session_gate = FsExecutionSessionGate::new(lock, &session_log);
    let snapshot_store = FsSnapshotStore::new(&fs, snapshots_root);
    let workflow_store = FsPinnedWorkflowStore::new(&fs, workflows_root);
    let clock = SystemClock;
    let id_factory = RandomIdFactory;
    let keyring = Keyring::new(HmacKey::from_bytes([3u8; KEY_BYTES]));

    let deps = EngineDeps {
        clock: &clock,
        id_factory: &id_factory,
        keyring: &keyring,
        session_log: &session_log,
        session_gate: &session_gate,
        snapshot_store: &snapshot_store,
        workflow_store: &workflow_store,
    };

    let workflow = single_step_workflow();
    let started = engine::start_workflow(&deps, workflow.workflow_id.clone(), &workflow, None).expect("starts");
    assert_eq!(started.pending_step_id.as_str(), "only_step");

    let continued = engine::continue_workflow(
        &deps,
        &ContinueRequest {
            state_token: started.state_token,
            intent: Intent::Advance,
            ack_token: Some(started.ack_token),
            context: None,
            output: None,
        },
    )
    .expect("advances");

    assert!(matches!(continued.outcome, ContinueOutcome::Complete));
    assert!(continued.ack_token.is_none());
}

#[test]
fn rehydrate_without_advancing_leaves_the_step_pending() {
    let root = tempfile::tempdir().expect("tempdir");
    let fs = LocalFileSystem::new();
    let sessions_root = root.path().join("sessions");
    let snapshots_root = root.path().join("snapshots");
    let workflows_root = root.path().join("workflows");

    let session_log = FsSessionEventLogStore::new(&fs, sessions_root.clone());
    let lock = FsSessionLock::new(&fs, sessions_root);
    let session_gate = FsExecutionSessionGate::new(lock, &session_log);
    let snapshot_store = FsSnapshotStore::new(&fs, snapshots_root);
    let workflow_store = FsPinnedWorkflowStore::new(&fs, workflows_root);
    let clock = SystemClock;
    let id_factory = RandomIdFactory;
    let keyring = Keyring::new(HmacKey::from_bytes([5u8; KEY_BYTES]));

    let deps = EngineDeps {
        clock: &clock,
        id_factory: &id_factory,
        keyring: &keyring,
        session_log: &session_log,
        session_gate: &session_gate,
        snapshot_store: &snapshot_store,
        workflow_store: &workflow_store,
    };

    let workflow = single_step_workflow();
    let started = engine::start_workflow(&deps, workflow.workflow_id.clone(), &workflow, None).expect("starts");

    let rehydrated = engine::continue_workflow(
        &deps,
        &ContinueRequest {
            state_token: started.state_token,
            intent: Intent::Rehydrate,
            ack_token: None,
            context: None,
            output: None,
        },
    )
    .expect("rehydrates");

    assert!(matches!(rehydrated.outcome, ContinueOutcome::Pending { .. }));
    assert!(rehydrated.ack_token.is_some());
}

#[test]
fn replaying_the_same_advance_is_a_no_op_and_returns_identical_tokens() {
    let root = tempfile::tempdir().expect("tempdir");
    let fs = LocalFileSystem::new();
    let sessions_root = root.path().join("sessions");
    let snapshots_root = root.path().join("snapshots");
    let workflows_root = root.path().join("workflows");

    let session_log = FsSessionEventLogStore::new(&fs, sessions_root.clone());
    let lock = FsSessionLock::new(&fs, sessions_root);
    let session_gate = FsExecutionSessionGate::new(lock, &session_log);
    let snapshot_store = FsSnapshotStore::new(&fs, snapshots_root);
    let workflow_store = FsPinnedWorkflowStore::new(&fs, workflows_root);
    let clock = SystemClock;
    let id_factory = RandomIdFactory;
    let keyring = Keyring::new(HmacKey::from_bytes([7u8; KEY_BYTES]));

    let deps = EngineDeps {
        clock: &clock,
        id_factory: &id_factory,
        keyring: &keyring,
        session_log: &session_log,
        session_gate: &session_gate,
        snapshot_store: &snapshot_store,
        workflow_store: &workflow_store,
    };

    let workflow = two_step_workflow();
    let started = engine::start_workflow(&deps, workflow.workflow_id.clone(), &workflow, None).expect("starts");

    let request = ContinueRequest {
        state_token: started.state_token,
        intent: Intent::Advance,
        ack_token: Some(started.ack_token),
        context: None,
        output: Some(SuppliedOutput {
            notes_markdown: Some("done with the first step".to_string()),
            artifacts: Vec::new(),
        }),
    };

    let first = engine::continue_workflow(&deps, &request).expect("first advance");
    let second = engine::continue_workflow(&deps, &request).expect("replayed advance");

    assert_eq!(first.state_token, second.state_token);
    assert_eq!(first.ack_token, second.ack_token);
    assert_eq!(first.checkpoint_token, second.checkpoint_token);
    assert!(matches!(second.outcome, ContinueOutcome::Pending { .. }));

    let LoadedSession::Valid { events } = session_log.load(&started.session_id).expect("load") else {
        panic!("session log did not validate");
    };
    let output_events = events.iter().filter(|event| matches!(event.data, EventData::NodeOutputAppended { .. })).count();
    assert_eq!(output_events, 1, "a replayed advance must not duplicate node_output_appended");
}
