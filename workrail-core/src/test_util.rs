// workrail-core/src/test_util.rs
// ============================================================================
// Module: In-Memory Filesystem Test Double
// Description: A `FileSystem` implementation backed by an in-process map.
// Purpose: Let engine/adapter tests exercise the real port contract without touching disk.
// Dependencies: crate::ports
// ============================================================================

//! ## Overview
//! Mirrors the teacher's `InMemoryRunStateStore`/`InMemoryObjectStore` test
//! doubles: a [`ports::FileSystem`] realized over a `Mutex`-guarded map
//! rather than `std::fs`, so tests that only need the port contract (not
//! real durability) never touch a temp directory. Built only under `test`
//! or the `test-util` feature; no production code depends on this module.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::ports::FsError;
use crate::ports::FileSystem;

// ============================================================================
// SECTION: InMemoryFileSystem
// ============================================================================

/// An in-process [`FileSystem`] backed by a `Mutex<BTreeMap<PathBuf, Vec<u8>>>`.
///
/// Directories are not modeled explicitly: `create_dir_all` is a no-op and
/// `list_dir` matches on path prefix. `fsync_dir_of` is a no-op since there
/// is no real directory to commit. This is sufficient to exercise every
/// capability trait built on [`FileSystem`] (the session log, the CAS
/// stores, the session lock) without ever touching real disk.
#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
    /// The backing store: path to file contents.
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl InMemoryFileSystem {
    /// Builds an empty in-memory filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the backing map, panicking only if a prior holder poisoned it
    /// (impossible in test code that doesn't panic while holding the lock).
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Builds an [`FsError::Io`] wrapping a synthetic "not found" source,
    /// for operations (`rename`, `remove_file`) that have no dedicated
    /// not-found variant of their own on [`FileSystem`].
    fn not_found(path: &Path) -> FsError {
        FsError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such entry in in-memory filesystem"),
        }
    }
}

impl FileSystem for InMemoryFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.lock().get(path).cloned().ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }

    fn write_new_fsynced(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        self.lock().insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let mut files = self.lock();
        let contents = files.remove(from).ok_or_else(|| Self::not_found(from))?;
        files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    fn fsync_dir_of(&self, _path: &Path) -> Result<(), FsError> {
        Ok(())
    }

    fn create_dir_all(&self, _path: &Path) -> Result<(), FsError> {
        Ok(())
    }

    fn create_new(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        let mut files = self.lock();
        if files.contains_key(path) {
            return Err(FsError::AlreadyExists(path.to_path_buf()));
        }
        files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        self.lock().remove(path).map(|_| ()).ok_or_else(|| Self::not_found(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        Ok(self
            .lock()
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let fs = InMemoryFileSystem::new();
        let path = Path::new("/a/b.txt");
        fs.write_new_fsynced(path, b"hello").expect("write");
        assert_eq!(fs.read(path).expect("read"), b"hello");
    }

    #[test]
    fn create_new_rejects_an_existing_path() {
        let fs = InMemoryFileSystem::new();
        let path = Path::new("/lock");
        fs.create_new(path, b"{}").expect("first create");
        let err = fs.create_new(path, b"{}").unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }

    #[test]
    fn rename_moves_contents_and_drops_the_source() {
        let fs = InMemoryFileSystem::new();
        let from = Path::new("/a/tmp");
        let to = Path::new("/a/final");
        fs.write_new_fsynced(from, b"payload").expect("write");
        fs.rename(from, to).expect("rename");
        assert!(!fs.exists(from));
        assert_eq!(fs.read(to).expect("read"), b"payload");
    }

    #[test]
    fn list_dir_returns_direct_children_only() {
        let fs = InMemoryFileSystem::new();
        fs.write_new_fsynced(Path::new("/a/one"), b"1").expect("write");
        fs.write_new_fsynced(Path::new("/a/two"), b"2").expect("write");
        fs.write_new_fsynced(Path::new("/a/nested/three"), b"3").expect("write");

        let mut entries = fs.list_dir(Path::new("/a")).expect("list");
        entries.sort();
        assert_eq!(entries, vec![PathBuf::from("/a/one"), PathBuf::from("/a/two")]);
    }

    #[test]
    fn remove_file_of_a_missing_path_is_an_error() {
        let fs = InMemoryFileSystem::new();
        assert!(fs.remove_file(Path::new("/missing")).is_err());
    }
}
