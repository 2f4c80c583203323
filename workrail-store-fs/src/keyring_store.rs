// workrail-store-fs/src/keyring_store.rs
// ============================================================================
// Module: File Keyring Store
// Description: Filesystem-backed implementation of workrail_core::ports::KeyringStore.
// Purpose: Own the on-disk lifecycle of keys/keyring.json (load-or-create, rotate-and-save).
// Dependencies: workrail-core, rand, serde_json
// ============================================================================

//! ## Overview
//! The keyring file is the one piece of legitimately global mutable state in
//! WorkRail (§9). `load_or_create` materializes a fresh key on first run;
//! `save` persists a rotated keyring through the same
//! temp-write/fsync/rename/fsync-dir ceremony every other durable write in
//! this crate uses.

use std::path::Path;
use std::path::PathBuf;

use rand::RngCore;
use rand::rngs::OsRng;

use workrail_core::core::keyring::HmacKey;
use workrail_core::core::keyring::KEY_BYTES;
use workrail_core::core::keyring::Keyring;
use workrail_core::core::keyring::KeyringFile;
use workrail_core::ports::FileSystem;
use workrail_core::ports::KeyringStore;
use workrail_core::ports::KeyringStoreError;

/// Loads and persists the keyring file at a fixed path.
pub struct FileKeyringStore<'a> {
    /// The filesystem adapter to read and write through.
    fs: &'a dyn FileSystem,
    /// Path to `keys/keyring.json`.
    path: PathBuf,
}

impl<'a> FileKeyringStore<'a> {
    /// Builds a keyring store rooted at `path`.
    #[must_use]
    pub fn new(fs: &'a dyn FileSystem, path: PathBuf) -> Self {
        Self { fs, path }
    }

    /// Path to the in-progress temp file used while saving.
    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone();
        tmp.set_extension("json.tmp");
        tmp
    }
}

/// Generates a fresh random HMAC-SHA-256 key from a CSPRNG.
fn random_key() -> HmacKey {
    let mut bytes = [0u8; KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    HmacKey::from_bytes(bytes)
}

impl KeyringStore for FileKeyringStore<'_> {
    fn load_or_create(&self) -> Result<Keyring, KeyringStoreError> {
        if !self.fs.exists(&self.path) {
            let keyring = Keyring::new(random_key());
            self.save(&keyring)?;
            return Ok(keyring);
        }
        let bytes = self.fs.read(&self.path)?;
        let file: KeyringFile = serde_json::from_slice(&bytes)
            .map_err(|err| KeyringStoreError::Invalid(err.to_string()))?;
        file.into_keyring().map_err(|err| KeyringStoreError::Invalid(err.to_string()))
    }

    fn save(&self, keyring: &Keyring) -> Result<(), KeyringStoreError> {
        let file = KeyringFile::from_keyring(keyring);
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|err| KeyringStoreError::Invalid(err.to_string()))?;
        if let Some(parent) = self.path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let tmp = self.tmp_path();
        self.fs.write_new_fsynced(&tmp, &bytes)?;
        self.fs.rename(&tmp, &self.path)?;
        self.fs.fsync_dir_of(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;

    fn keyring_path(dir: &Path) -> PathBuf {
        dir.join("keys").join("keyring.json")
    }

    #[test]
    fn load_or_create_materializes_a_fresh_key_on_first_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FileKeyringStore::new(&fs, keyring_path(dir.path()));
        let keyring = store.load_or_create().expect("creates");
        let sig = keyring.sign(b"payload");
        assert!(keyring.verify(b"payload", &sig));
    }

    #[test]
    fn load_or_create_is_stable_across_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FileKeyringStore::new(&fs, keyring_path(dir.path()));
        let first = store.load_or_create().expect("creates");
        let second = store.load_or_create().expect("loads existing");
        let sig = first.sign(b"x");
        assert!(second.verify(b"x", &sig));
    }

    #[test]
    fn save_then_load_preserves_a_rotation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = LocalFileSystem::new();
        let store = FileKeyringStore::new(&fs, keyring_path(dir.path()));
        let mut keyring = store.load_or_create().expect("creates");
        let old_sig = keyring.sign(b"payload");
        keyring.rotate(random_key());
        store.save(&keyring).expect("saves rotation");

        let reloaded = store.load_or_create().expect("reloads");
        assert!(reloaded.verify(b"payload", &old_sig));
    }
}
