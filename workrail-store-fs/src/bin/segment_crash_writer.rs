//! Crash writer for session-log durability tests.
// workrail-store-fs/src/bin/segment_crash_writer.rs
// ============================================================================
// Binary: Segment Crash Writer
// Description: Simulates a crash partway through the §4.3 commit ceremony.
// Purpose: Support durability tests for recovery from an interrupted append.
// Dependencies: workrail-core, workrail-store-fs
// ============================================================================

use std::env;
use std::path::PathBuf;

use workrail_core::core::events::DomainEvent;
use workrail_core::core::events::EventData;
use workrail_core::core::events::EventScope;
use workrail_core::core::identifiers::EventId;
use workrail_core::core::identifiers::SessionId;
use workrail_core::core::identifiers::WorkflowHash;
use workrail_core::core::identifiers::WorkflowId;
use workrail_core::core::time::Timestamp;
use workrail_core::ports::FileSystem;
use workrail_store_fs::LocalFileSystem;

/// Writes a session's first segment's temp file and `fsync`s it, then
/// aborts before the rename that would make it visible to a loader — the
/// exact interruption point §4.3 names as leaving an ignorable orphan.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let sessions_root = args.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing sessions root")
    })?;
    let session_id = args.next().unwrap_or_else(|| "sess_crash".to_string());
    let sessions_root = PathBuf::from(sessions_root);

    let fs = LocalFileSystem::new();
    let session_id = SessionId::new(session_id);
    let session_dir = sessions_root.join(session_id.as_str());
    fs.create_dir_all(&session_dir)?;

    let event = DomainEvent {
        v: 1,
        event_id: EventId::new("evt_crash_0"),
        event_index: 0,
        session_id: session_id.clone(),
        dedupe_key: "dk_crash_0".to_string(),
        scope: EventScope::default(),
        recorded_at: Timestamp::from(0_i64),
        data: EventData::SessionCreated {
            workflow_id: WorkflowId::new("wf_crash"),
            workflow_hash: WorkflowHash::new(format!("sha256:{}", "0".repeat(64))),
        },
    };
    let mut bytes = serde_json::to_vec(&event)?;
    bytes.push(b'\n');

    let tmp_path = session_dir.join("segment.0.jsonl.tmp");
    fs.write_new_fsynced(&tmp_path, &bytes)?;

    std::process::abort();
}
