// workrail-store-fs/src/filesystem.rs
// ============================================================================
// Module: Local Filesystem Adapter
// Description: std::fs-backed implementation of workrail_core::ports::FileSystem.
// Purpose: The one concrete I/O boundary every other adapter in this crate builds on.
// Dependencies: workrail-core, std::fs
// ============================================================================

//! ## Overview
//! Mirrors the teacher's capability-scoped temp-write/fsync/rename ceremony
//! (`decision-gate-contract/src/contract.rs`'s `write_bytes_atomic`), adapted
//! from `cap_std::fs::Dir` onto plain `std::fs::File`/`std::fs::OpenOptions`.
//! `write_new_fsynced` truncates and writes but never renames; callers that
//! need atomicity compose it with [`LocalFileSystem::rename`] and
//! [`LocalFileSystem::fsync_dir_of`] themselves, matching §4.3's and §4.4's
//! explicit commit ceremonies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read as _;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use workrail_core::ports::FileSystem;
use workrail_core::ports::FsError;

// ============================================================================
// SECTION: LocalFileSystem
// ============================================================================

/// A [`FileSystem`] backed by the real local disk, rooted nowhere in
/// particular: every method takes an absolute or caller-relative path as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Builds a new local filesystem adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        let mut file = File::open(path).map_err(|source| map_open_err(path, source))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|source| io_err(path, source))?;
        Ok(buf)
    }

    fn write_new_fsynced(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| io_err(path, source))?;
        file.write_all(contents).map_err(|source| io_err(path, source))?;
        file.sync_all().map_err(|_| FsError::FsyncUnsupported(path.to_path_buf()))?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        std::fs::rename(from, to).map_err(|source| io_err(to, source))
    }

    fn fsync_dir_of(&self, path: &Path) -> Result<(), FsError> {
        let Some(dir) = path.parent() else {
            return Err(FsError::FsyncUnsupported(path.to_path_buf()));
        };
        let dir = File::open(dir).map_err(|source| io_err(path, source))?;
        dir.sync_all().map_err(|_| FsError::FsyncUnsupported(path.to_path_buf()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        std::fs::create_dir_all(path).map_err(|source| io_err(path, source))
    }

    fn create_new(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path).map_err(
            |source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    FsError::AlreadyExists(path.to_path_buf())
                } else {
                    io_err(path, source)
                }
            },
        )?;
        file.write_all(contents).map_err(|source| io_err(path, source))?;
        file.sync_all().map_err(|_| FsError::FsyncUnsupported(path.to_path_buf()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        std::fs::remove_file(path).map_err(|source| io_err(path, source))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(path).map_err(|source| io_err(path, source))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_err(path, source))?;
            out.push(entry.path());
        }
        out.sort();
        Ok(out)
    }
}

/// Maps a `File::open` failure to the closed [`FsError`] set.
fn map_open_err(path: &Path, source: std::io::Error) -> FsError {
    if source.kind() == std::io::ErrorKind::NotFound {
        FsError::NotFound(path.to_path_buf())
    } else {
        io_err(path, source)
    }
}

/// Wraps a generic I/O failure with the path it occurred against.
fn io_err(path: &Path, source: std::io::Error) -> FsError {
    FsError::Io { path: path.to_path_buf(), source }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_file_reports_not_found() {
        let fs = LocalFileSystem::new();
        let err = fs.read(Path::new("/nonexistent/path/workrail-test")).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.txt");
        let fs = LocalFileSystem::new();
        fs.write_new_fsynced(&path, b"hello").expect("write");
        assert_eq!(fs.read(&path).expect("read"), b"hello");
    }

    #[test]
    fn create_new_rejects_existing_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lock");
        let fs = LocalFileSystem::new();
        fs.create_new(&path, b"first").expect("first create succeeds");
        let err = fs.create_new(&path, b"second").unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }

    #[test]
    fn list_dir_on_missing_dir_is_empty() {
        let fs = LocalFileSystem::new();
        let entries = fs.list_dir(Path::new("/nonexistent/workrail-dir")).expect("ok");
        assert!(entries.is_empty());
    }
}
