// workrail-core/src/core/keyring.rs
// ============================================================================
// Module: WorkRail Keyring
// Description: Active HMAC signing keys and constant-time token authentication.
// Purpose: Provide the {current, previous?} key lifecycle token signing relies on.
// Dependencies: hmac, sha2, subtle, serde
// ============================================================================

//! ## Overview
//! The keyring is the one legitimately global piece of mutable state in
//! WorkRail (§9): a `current` HMAC-SHA-256 key and an optional `previous` key
//! kept alive across a rotation so tokens signed just before a rotation still
//! verify. Its lifecycle (`loadOrCreate`, `rotate`) is explicit; nothing here
//! reads or writes a file — that belongs to the [`crate::ports::Keyring`]
//! capability and its filesystem adapter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::core::canonical::base64url_decode;
use crate::core::canonical::base64url_encode;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of an HMAC-SHA-256 key and signature.
pub const KEY_BYTES: usize = 32;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by keyring key material handling.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// A key's base64url encoding did not decode to exactly [`KEY_BYTES`] bytes.
    #[error("keyring key must decode to {KEY_BYTES} bytes, got {0}")]
    BadKeyLength(usize),
    /// The key material failed to decode as base64url.
    #[error("keyring key is not valid base64url: {0}")]
    BadEncoding(String),
}

// ============================================================================
// SECTION: HMAC Key
// ============================================================================

/// A single HMAC-SHA-256 key, held as raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct HmacKey(Box<[u8; KEY_BYTES]>);

impl std::fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HmacKey").field(&"<redacted>").finish()
    }
}

impl HmacKey {
    /// Builds a key from exactly [`KEY_BYTES`] raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(Box::new(bytes))
    }

    /// Decodes a key from its base64url serialization.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::BadEncoding`] or [`KeyringError::BadKeyLength`].
    pub fn from_base64url(text: &str) -> Result<Self, KeyringError> {
        let bytes = base64url_decode(text).map_err(|err| KeyringError::BadEncoding(err.to_string()))?;
        let len = bytes.len();
        let array: [u8; KEY_BYTES] = bytes.try_into().map_err(|_| KeyringError::BadKeyLength(len))?;
        Ok(Self::from_bytes(array))
    }

    /// Encodes the key as base64url text for storage.
    #[must_use]
    pub fn to_base64url(&self) -> String {
        base64url_encode(self.0.as_slice())
    }

    fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

// ============================================================================
// SECTION: Keyring State
// ============================================================================

/// The active signing key plus an optional key retained across a rotation.
///
/// # Invariants
/// - `current` is always present; `previous` exists only immediately after a
///   [`Keyring::rotate`] and is dropped on the rotation after that.
#[derive(Debug, Clone)]
pub struct Keyring {
    current: HmacKey,
    previous: Option<HmacKey>,
}

impl Keyring {
    /// Builds a keyring with a single current key and no retained previous key.
    #[must_use]
    pub const fn new(current: HmacKey) -> Self {
        Self {
            current,
            previous: None,
        }
    }

    /// Builds a keyring from both a current and a retained previous key.
    #[must_use]
    pub const fn with_previous(current: HmacKey, previous: HmacKey) -> Self {
        Self {
            current,
            previous: Some(previous),
        }
    }

    /// Returns the current signing key.
    #[must_use]
    pub const fn current(&self) -> &HmacKey {
        &self.current
    }

    /// Returns the retained previous key, if a rotation has occurred.
    #[must_use]
    pub const fn previous(&self) -> Option<&HmacKey> {
        self.previous.as_ref()
    }

    /// Rotates the keyring: `current` becomes `previous`, and `new_key`
    /// becomes `current`. The key retained before this rotation, if any, is
    /// discarded — only one generation back ever verifies.
    pub fn rotate(&mut self, new_key: HmacKey) {
        let retiring = std::mem::replace(&mut self.current, new_key);
        self.previous = Some(retiring);
    }

    /// Signs `payload` with the current key, returning the raw 32-byte MAC.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> [u8; KEY_BYTES] {
        hmac_sign(&self.current, payload)
    }

    /// Verifies `signature` over `payload` against the current key, then the
    /// previous key if present. Comparison is constant-time.
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        if hmac_verify(&self.current, payload, signature) {
            return true;
        }
        self.previous
            .as_ref()
            .is_some_and(|key| hmac_verify(key, payload, signature))
    }
}

// ============================================================================
// SECTION: HMAC Primitives
// ============================================================================

/// Computes an HMAC-SHA-256 MAC over `payload` with `key`.
///
/// HMAC accepts keys of any length, so `new_from_slice` over a fixed
/// [`KEY_BYTES`]-length key cannot fail; a failure collapses to an
/// all-zero MAC rather than panicking, matching this module's
/// errors-as-data discipline.
#[must_use]
fn hmac_sign(key: &HmacKey, payload: &[u8]) -> [u8; KEY_BYTES] {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key.as_bytes()) else {
        return [0u8; KEY_BYTES];
    };
    mac.update(payload);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; KEY_BYTES];
    out.copy_from_slice(&result);
    out
}

/// Verifies an HMAC-SHA-256 MAC in constant time.
#[must_use]
fn hmac_verify(key: &HmacKey, payload: &[u8], signature: &[u8]) -> bool {
    if signature.len() != KEY_BYTES {
        return false;
    }
    let expected = hmac_sign(key, payload);
    bool::from(expected.ct_eq(signature))
}

// ============================================================================
// SECTION: On-Disk Representation
// ============================================================================

/// Serialized form of a single keyring entry: `{alg, keyBase64Url}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEntry {
    /// Always `hmac_sha256`.
    pub alg: String,
    /// Base64url-encoded raw key bytes.
    pub key_base64_url: String,
}

/// On-disk keyring file shape: `keys/keyring.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringFile {
    /// Schema version, always `1`.
    pub v: u8,
    /// The active signing key.
    pub current: KeyEntry,
    /// The retained previous signing key, if a rotation has occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<KeyEntry>,
}

/// Name of the HMAC algorithm recorded in keyring files.
pub const HMAC_SHA256_ALG: &str = "hmac_sha256";

impl KeyringFile {
    /// Converts a loaded keyring file into in-memory key material.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError`] if either key entry fails to decode.
    pub fn into_keyring(self) -> Result<Keyring, KeyringError> {
        let current = HmacKey::from_base64url(&self.current.key_base64_url)?;
        let previous = self
            .previous
            .map(|entry| HmacKey::from_base64url(&entry.key_base64_url))
            .transpose()?;
        Ok(match previous {
            Some(previous) => Keyring::with_previous(current, previous),
            None => Keyring::new(current),
        })
    }

    /// Builds a keyring file from in-memory key material.
    #[must_use]
    pub fn from_keyring(keyring: &Keyring) -> Self {
        Self {
            v: 1,
            current: KeyEntry {
                alg: HMAC_SHA256_ALG.to_string(),
                key_base64_url: keyring.current().to_base64url(),
            },
            previous: keyring.previous().map(|key| KeyEntry {
                alg: HMAC_SHA256_ALG.to_string(),
                key_base64_url: key.to_base64url(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> HmacKey {
        HmacKey::from_bytes([byte; KEY_BYTES])
    }

    #[test]
    fn sign_then_verify_with_current_key_succeeds() {
        let ring = Keyring::new(key(1));
        let sig = ring.sign(b"payload");
        assert!(ring.verify(b"payload", &sig));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let ring = Keyring::new(key(1));
        let sig = ring.sign(b"payload");
        assert!(!ring.verify(b"other payload", &sig));
    }

    #[test]
    fn rotate_keeps_previous_key_verifiable() {
        let mut ring = Keyring::new(key(1));
        let old_sig = ring.sign(b"payload");
        ring.rotate(key(2));
        assert!(ring.verify(b"payload", &old_sig));
        let new_sig = ring.sign(b"payload");
        assert!(ring.verify(b"payload", &new_sig));
    }

    #[test]
    fn second_rotation_drops_the_oldest_key() {
        let mut ring = Keyring::new(key(1));
        let oldest_sig = ring.sign(b"payload");
        ring.rotate(key(2));
        ring.rotate(key(3));
        assert!(!ring.verify(b"payload", &oldest_sig));
    }

    #[test]
    fn keyring_file_round_trips() {
        let mut ring = Keyring::new(key(7));
        ring.rotate(key(8));
        let file = KeyringFile::from_keyring(&ring);
        assert!(file.previous.is_some());
        let restored = file.into_keyring().expect("round trips");
        let sig = ring.sign(b"x");
        assert!(restored.verify(b"x", &sig));
    }
}
