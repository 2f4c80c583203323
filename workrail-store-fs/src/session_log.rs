// workrail-store-fs/src/session_log.rs
// ============================================================================
// Module: Filesystem Session Event Log Store
// Description: Crash-safe append-only JSONL segments plus manifest (§4.3).
// Purpose: The single source of truth for one session's event history.
// Dependencies: workrail-core, serde_json
// ============================================================================

//! ## Overview
//! Each session owns a directory of ordered JSONL segment files plus a
//! manifest (append-only records: `segment_opened`, `segment_closed`,
//! `snapshot_pinned`). `append` follows the seven-step commit ceremony
//! verbatim from §4.3: `mkdirp` the session dir, write the temp segment file,
//! `fsync` + close it, rename it into place, `fsync` the directory, append
//! the `segment_closed` manifest record (same write ceremony), then append
//! any `snapshot_pinned` records. A segment file without a matching
//! `segment_closed` record is an orphan from an interrupted write and is
//! ignored on load. `load` replays the manifest, validates every attested
//! segment's digest and index contiguity, and schema-checks every event;
//! `load_validated_prefix` does the same but returns the longest clean
//! prefix instead of failing on tail corruption (§3.9, §4.3).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use workrail_core::core::canonical::sha256_hex;
use workrail_core::core::events::DomainEvent;
use workrail_core::core::identifiers::SessionId;
use workrail_core::ports::AppendPlan;
use workrail_core::ports::CorruptionLocation;
use workrail_core::ports::CorruptionReason;
use workrail_core::ports::FileSystem;
use workrail_core::ports::FsError;
use workrail_core::ports::HealthyLock;
use workrail_core::ports::LoadedSession;
use workrail_core::ports::SessionEventLogStore;
use workrail_core::ports::SessionStoreError;

const ENVELOPE_VERSION: u8 = 1;

// ============================================================================
// SECTION: Manifest Records
// ============================================================================

/// One line of a session's append-only manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ManifestRecord {
    /// A new segment was opened for writing.
    SegmentOpened {
        /// 0-based index of the opened segment.
        segment_index: u64,
    },
    /// A segment finished its commit ceremony and is safe to load.
    SegmentClosed {
        /// 0-based index of the closed segment.
        segment_index: u64,
        /// The first `eventIndex` this segment holds.
        from_event_index: u64,
        /// The last `eventIndex` this segment holds.
        to_event_index: u64,
        /// SHA-256 hex digest of the segment file's bytes.
        sha256: String,
        /// Size of the segment file in bytes.
        bytes: u64,
    },
    /// A snapshot was pinned after a segment closed.
    SnapshotPinned {
        /// The pinned snapshot's content-addressed ref.
        snapshot_ref: String,
        /// The `eventIndex` the pin is associated with.
        event_index: u64,
        /// The event whose processing produced this pin.
        created_by_event_id: String,
    },
}

/// A manifest-attested, closed segment ready to be read back.
struct ClosedSegment {
    segment_index: u64,
    from_event_index: u64,
    to_event_index: u64,
    sha256: String,
}

// ============================================================================
// SECTION: FsSessionEventLogStore
// ============================================================================

/// Crash-safe, filesystem-backed [`SessionEventLogStore`] (§4.3).
pub struct FsSessionEventLogStore<'a> {
    /// The filesystem adapter every write and read goes through.
    fs: &'a dyn FileSystem,
    /// Root directory under which every session's directory lives.
    sessions_root: PathBuf,
}

impl<'a> FsSessionEventLogStore<'a> {
    /// Builds a session log store rooted at `sessions_root`.
    #[must_use]
    pub fn new(fs: &'a dyn FileSystem, sessions_root: PathBuf) -> Self {
        Self { fs, sessions_root }
    }

    /// The directory owning one session's segments, manifest, and lock file.
    #[must_use]
    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.sessions_root.join(session_id.as_str())
    }

    fn manifest_path(&self, session_id: &SessionId) -> PathBuf {
        self.session_dir(session_id).join("manifest.jsonl")
    }

    fn segment_path(&self, session_id: &SessionId, segment_index: u64) -> PathBuf {
        self.session_dir(session_id).join(format!("segment.{segment_index}.jsonl"))
    }

    /// Reads and parses every line of the manifest, ignoring a trailing
    /// partial line (an artifact of a crash mid-append).
    fn read_manifest(&self, session_id: &SessionId) -> Result<Vec<ManifestRecord>, SessionStoreError> {
        let path = self.manifest_path(session_id);
        if !self.fs.exists(&path) {
            return Ok(Vec::new());
        }
        let bytes = self.fs.read(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        let mut records = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ManifestRecord>(line) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }
        Ok(records)
    }

    /// Folds manifest records into the closed, attested segments, in order.
    /// `segment_opened` / orphaned `segment_closed` records for files that
    /// never completed the ceremony are dropped by construction: only a
    /// `SegmentClosed` record proves the rename+fsync completed.
    fn closed_segments(records: &[ManifestRecord]) -> Vec<ClosedSegment> {
        let mut out = Vec::new();
        for record in records {
            if let ManifestRecord::SegmentClosed { segment_index, from_event_index, to_event_index, sha256, .. } =
                record
            {
                out.push(ClosedSegment {
                    segment_index: *segment_index,
                    from_event_index: *from_event_index,
                    to_event_index: *to_event_index,
                    sha256: sha256.clone(),
                });
            }
        }
        out
    }

    /// Reads, digest-validates, and parses every closed segment in order,
    /// stopping at the first structural problem and reporting why.
    fn load_segments(
        &self,
        session_id: &SessionId,
        segments: &[ClosedSegment],
    ) -> Result<(Vec<DomainEvent>, Option<CorruptionReason>), SessionStoreError> {
        let mut events = Vec::new();
        let mut next_expected: u64 = 0;

        for segment in segments {
            let path = self.segment_path(session_id, segment.segment_index);
            if !self.fs.exists(&path) {
                return Ok((events, Some(CorruptionReason::MissingAttestedSegment)));
            }
            let bytes = self.fs.read(&path)?;
            if sha256_hex(&bytes) != segment.sha256 {
                return Ok((events, Some(CorruptionReason::DigestMismatch)));
            }

            let text = String::from_utf8_lossy(&bytes);
            let mut segment_events = Vec::new();
            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<DomainEvent>(line) else {
                    return Ok((events, Some(CorruptionReason::SchemaValidationFailed)));
                };
                if event.v != ENVELOPE_VERSION {
                    return Ok((events, Some(CorruptionReason::UnknownSchemaVersion)));
                }
                segment_events.push(event);
            }

            if segment_events.is_empty()
                || segment_events.first().map(|event| event.event_index) != Some(segment.from_event_index)
                || segment_events.last().map(|event| event.event_index) != Some(segment.to_event_index)
            {
                return Ok((events, Some(CorruptionReason::NonContiguousIndices)));
            }
            for event in &segment_events {
                if event.event_index != next_expected {
                    return Ok((events, Some(CorruptionReason::NonContiguousIndices)));
                }
                next_expected += 1;
            }

            events.extend(segment_events);
        }

        Ok((events, None))
    }

    fn next_segment_index(records: &[ManifestRecord]) -> u64 {
        records
            .iter()
            .filter_map(|record| match record {
                ManifestRecord::SegmentOpened { segment_index }
                | ManifestRecord::SegmentClosed { segment_index, .. } => Some(*segment_index),
                ManifestRecord::SnapshotPinned { .. } => None,
            })
            .max()
            .map_or(0, |index| index + 1)
    }

    /// Appends one JSON line to a manifest file, creating it if absent, using
    /// the same write/fsync/close ceremony (manifest appends aren't renamed:
    /// the file is append-only by construction, so durability only needs the
    /// `fsync` half of the ceremony).
    fn append_manifest_record(&self, session_id: &SessionId, record: &ManifestRecord) -> Result<(), SessionStoreError> {
        let path = self.manifest_path(session_id);
        let mut existing = if self.fs.exists(&path) { self.fs.read(&path)? } else { Vec::new() };
        let line = serde_json::to_string(record)
            .map_err(|err| SessionStoreError::InvariantViolation(err.to_string()))?;
        existing.extend_from_slice(line.as_bytes());
        existing.push(b'\n');
        self.fs.write_new_fsynced(&path, &existing)?;
        self.fs.fsync_dir_of(&path)?;
        Ok(())
    }

    fn load_inner(&self, session_id: &SessionId) -> Result<(Vec<DomainEvent>, Option<CorruptionReason>), SessionStoreError> {
        let records = self.read_manifest(session_id)?;
        let segments = Self::closed_segments(&records);
        self.load_segments(session_id, &segments)
    }
}

impl SessionEventLogStore for FsSessionEventLogStore<'_> {
    fn load(&self, session_id: &SessionId) -> Result<LoadedSession, SessionStoreError> {
        let (events, reason) = self.load_inner(session_id)?;
        match reason {
            None => Ok(LoadedSession::Valid { events }),
            Some(reason) => Err(SessionStoreError::CorruptionDetected { location: CorruptionLocation::Tail, reason }),
        }
    }

    fn load_validated_prefix(&self, session_id: &SessionId) -> Result<LoadedSession, SessionStoreError> {
        let (events, reason) = self.load_inner(session_id)?;
        match reason {
            None => Ok(LoadedSession::Valid { events }),
            Some(tail_reason) => Ok(LoadedSession::Truncated { events, tail_reason }),
        }
    }

    fn append(&self, lock: &HealthyLock, plan: &AppendPlan) -> Result<(), SessionStoreError> {
        let session_id = lock.session_id().clone();
        if plan.events.is_empty() {
            return Ok(());
        }

        let (existing_events, reason) = self.load_inner(&session_id)?;
        if let Some(reason) = reason {
            return Err(SessionStoreError::CorruptionDetected { location: CorruptionLocation::Tail, reason });
        }

        let existing_keys: std::collections::HashSet<&str> =
            existing_events.iter().map(|event| event.dedupe_key.as_str()).collect();
        let present = plan.events.iter().filter(|event| existing_keys.contains(event.dedupe_key.as_str())).count();
        if present == plan.events.len() {
            return Ok(());
        }
        if present > 0 {
            return Err(SessionStoreError::InvariantViolation(
                "partial dedupeKey overlap between append plan and existing log".to_string(),
            ));
        }

        let tail_index = existing_events.last().map(|event| event.event_index);
        let mut expected = tail_index.map_or(0, |index| index + 1);
        for event in &plan.events {
            if event.event_index != expected {
                return Err(SessionStoreError::InvariantViolation(format!(
                    "non-contiguous eventIndex: expected {expected}, got {}",
                    event.event_index
                )));
            }
            expected += 1;
        }

        self.fs.create_dir_all(&self.session_dir(&session_id))?;

        let records = self.read_manifest(&session_id)?;
        let segment_index = Self::next_segment_index(&records);
        self.append_manifest_record(&session_id, &ManifestRecord::SegmentOpened { segment_index })?;

        let mut segment_bytes = Vec::new();
        for event in &plan.events {
            let line = serde_json::to_string(event)
                .map_err(|err| SessionStoreError::InvariantViolation(err.to_string()))?;
            segment_bytes.extend_from_slice(line.as_bytes());
            segment_bytes.push(b'\n');
        }

        let final_path = self.segment_path(&session_id, segment_index);
        let tmp_path = tmp_segment_path(&final_path);
        self.fs.write_new_fsynced(&tmp_path, &segment_bytes)?;
        self.fs.rename(&tmp_path, &final_path)?;
        self.fs.fsync_dir_of(&final_path)?;

        let from_event_index = plan.events.first().map_or(0, |event| event.event_index);
        let to_event_index = plan.events.last().map_or(0, |event| event.event_index);
        self.append_manifest_record(
            &session_id,
            &ManifestRecord::SegmentClosed {
                segment_index,
                from_event_index,
                to_event_index,
                sha256: sha256_hex(&segment_bytes),
                bytes: segment_bytes.len() as u64,
            },
        )?;

        for pin in &plan.snapshot_pins {
            self.append_manifest_record(
                &session_id,
                &ManifestRecord::SnapshotPinned {
                    snapshot_ref: pin.snapshot_ref.hex().to_string(),
                    event_index: pin.event_index,
                    created_by_event_id: pin.created_by_event_id.as_str().to_string(),
                },
            )?;
        }

        Ok(())
    }
}

fn tmp_segment_path(final_path: &Path) -> PathBuf {
    let mut tmp = final_path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl From<FsError> for SessionStoreError {
    fn from(value: FsError) -> Self {
        Self::Io(value)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use workrail_core::core::events::EventData;
    use workrail_core::core::events::EventScope;
    use workrail_core::core::identifiers::EventId;
    use workrail_core::core::identifiers::WorkflowHash;
    use workrail_core::core::identifiers::WorkflowId;
    use workrail_core::core::time::Timestamp;

    fn event(session_id: &SessionId, index: u64, dedupe_key: &str) -> DomainEvent {
        DomainEvent {
            v: ENVELOPE_VERSION,
            event_id: EventId::new(format!("evt_{index}")),
            event_index: index,
            session_id: session_id.clone(),
            dedupe_key: dedupe_key.to_string(),
            scope: EventScope::default(),
            recorded_at: Timestamp::from(1_000_000_i64),
            data: EventData::SessionCreated {
                workflow_id: WorkflowId::new("wf_a"),
                workflow_hash: WorkflowHash::new("sha256:".to_string() + &"0".repeat(64)),
            },
        }
    }

    #[test]
    fn loading_a_session_with_no_directory_is_empty_and_healthy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSessionEventLogStore::new(&fs, dir.path().to_path_buf());
        let session_id = SessionId::new("sess_new");
        let loaded = store.load(&session_id).expect("loads");
        assert_eq!(loaded, LoadedSession::Valid { events: Vec::new() });
    }

    #[test]
    fn append_then_load_round_trips_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSessionEventLogStore::new(&fs, dir.path().to_path_buf());
        let session_id = SessionId::new("sess_rt");
        let lock = HealthyLock::new_for_gate(session_id.clone());

        let plan =
            AppendPlan { events: vec![event(&session_id, 0, "dk0")], snapshot_pins: Vec::new() };
        store.append(&lock, &plan).expect("append");

        let loaded = store.load(&session_id).expect("loads");
        match loaded {
            LoadedSession::Valid { events } => assert_eq!(events.len(), 1),
            LoadedSession::Truncated { .. } => panic!("expected a valid load"),
        }
    }

    #[test]
    fn appending_the_same_dedupe_keys_twice_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSessionEventLogStore::new(&fs, dir.path().to_path_buf());
        let session_id = SessionId::new("sess_dd");
        let lock = HealthyLock::new_for_gate(session_id.clone());

        let plan =
            AppendPlan { events: vec![event(&session_id, 0, "dk0")], snapshot_pins: Vec::new() };
        store.append(&lock, &plan).expect("first append");
        store.append(&lock, &plan).expect("second append is a no-op");

        let loaded = store.load(&session_id).expect("loads");
        match loaded {
            LoadedSession::Valid { events } => assert_eq!(events.len(), 1),
            LoadedSession::Truncated { .. } => panic!("expected a valid load"),
        }
    }

    #[test]
    fn partial_dedupe_overlap_is_an_invariant_violation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSessionEventLogStore::new(&fs, dir.path().to_path_buf());
        let session_id = SessionId::new("sess_pd");
        let lock = HealthyLock::new_for_gate(session_id.clone());

        let first = AppendPlan { events: vec![event(&session_id, 0, "dk0")], snapshot_pins: Vec::new() };
        store.append(&lock, &first).expect("first append");

        let second = AppendPlan {
            events: vec![event(&session_id, 0, "dk0"), event(&session_id, 1, "dk1")],
            snapshot_pins: Vec::new(),
        };
        let err = store.append(&lock, &second).unwrap_err();
        assert!(matches!(err, SessionStoreError::InvariantViolation(_)));
    }

    #[test]
    fn a_segment_without_a_closed_record_is_ignored_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSessionEventLogStore::new(&fs, dir.path().to_path_buf());
        let session_id = SessionId::new("sess_orphan");
        fs.create_dir_all(&store.session_dir(&session_id)).expect("mkdir");
        fs.write_new_fsynced(&store.segment_path(&session_id, 0), b"{not json}\n").expect("write orphan");

        let loaded = store.load(&session_id).expect("loads");
        assert_eq!(loaded, LoadedSession::Valid { events: Vec::new() });
    }

    #[test]
    fn a_corrupted_digest_reports_tail_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FsSessionEventLogStore::new(&fs, dir.path().to_path_buf());
        let session_id = SessionId::new("sess_corrupt");
        let lock = HealthyLock::new_for_gate(session_id.clone());
        let plan = AppendPlan { events: vec![event(&session_id, 0, "dk0")], snapshot_pins: Vec::new() };
        store.append(&lock, &plan).expect("append");

        fs.write_new_fsynced(&store.segment_path(&session_id, 0), b"{\"tampered\":true}\n")
            .expect("tamper");

        let err = store.load(&session_id).unwrap_err();
        assert!(matches!(
            err,
            SessionStoreError::CorruptionDetected { reason: CorruptionReason::DigestMismatch, .. }
        ));

        let prefix = store.load_validated_prefix(&session_id).expect("salvage load");
        match prefix {
            LoadedSession::Truncated { events, tail_reason } => {
                assert!(events.is_empty());
                assert_eq!(tail_reason, CorruptionReason::DigestMismatch);
            }
            LoadedSession::Valid { .. } => panic!("expected a truncated load"),
        }
    }
}
