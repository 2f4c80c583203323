// workrail-core/src/core/canonical.rs
// ============================================================================
// Module: WorkRail Encoding & Canonicalization
// Description: RFC 8785 JSON canonicalization, SHA-256, base64url, base32, bech32m.
// Purpose: Pure functions shared by every component that hashes or signs bytes.
// Dependencies: serde, serde_jcs, sha2, base64, bech32
// ============================================================================

//! ## Overview
//! WorkRail content-addresses and signs everything through the same narrow
//! set of pure primitives: [RFC 8785] canonical JSON bytes, SHA-256 digests
//! over those bytes, and three text encodings (`base64url` for id payloads,
//! `base32` lower no-pad for session ids, `bech32m` for token framing). None
//! of these functions perform I/O.
//!
//! [RFC 8785]: https://www.rfc-editor.org/rfc/rfc8785

// ============================================================================
// SECTION: Imports
// ============================================================================

use bech32::Hrp;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by canonicalization and encoding primitives.
#[derive(Debug, Error)]
pub enum CanonError {
    /// JSON canonicalization failed, typically because the value contained a
    /// non-finite number (`NaN`/`Infinity`), which JCS cannot represent.
    #[error("context_non_finite_number: {0}")]
    NonFiniteNumber(String),
    /// bech32m decoding or checksum verification failed.
    #[error("bech32m decode failed: {0}")]
    Bech32(String),
    /// base32 decoding failed (bad alphabet or padding present).
    #[error("base32 decode failed")]
    Base32,
}

// ============================================================================
// SECTION: JCS Canonicalization
// ============================================================================

/// Serializes `value` as RFC 8785 canonical JSON bytes: object keys sorted by
/// UTF-16 code unit, arrays left in input order, numbers in shortest
/// ECMAScript round-trip form, UTF-8 output. Non-finite numbers fail.
///
/// # Errors
///
/// Returns [`CanonError::NonFiniteNumber`] when `value` contains a `NaN` or
/// infinite float, or any other JCS serialization failure.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonError> {
    serde_jcs::to_vec(value).map_err(|err| CanonError::NonFiniteNumber(err.to_string()))
}

/// Computes the SHA-256 digest of raw bytes, returned as lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Computes `sha256:<64-hex>` of a value's canonical JSON bytes.
///
/// # Errors
///
/// Returns [`CanonError::NonFiniteNumber`] when canonicalization fails.
pub fn hash_canonical_ref<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonError> {
    let bytes = to_canonical_bytes(value)?;
    Ok(format!("sha256:{}", sha256_hex(&bytes)))
}

// ============================================================================
// SECTION: Hex
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: base64url
// ============================================================================

/// Encodes bytes as unpadded base64url, per RFC 4648 §5.
#[must_use]
pub fn base64url_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes unpadded base64url text into bytes.
///
/// # Errors
///
/// Returns an error if `text` is not valid unpadded base64url.
pub fn base64url_decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(text)
}

// ============================================================================
// SECTION: base32 (lower, no padding)
// ============================================================================

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Encodes bytes as lowercase, unpadded RFC 4648 base32.
#[must_use]
pub fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;

    for &byte in bytes {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = usize::try_from((buffer >> bits) & 0x1f).unwrap_or(0);
            out.push(BASE32_ALPHABET[index] as char);
        }
    }
    if bits > 0 {
        let index = usize::try_from((buffer << (5 - bits)) & 0x1f).unwrap_or(0);
        out.push(BASE32_ALPHABET[index] as char);
    }
    out
}

/// Decodes lowercase, unpadded RFC 4648 base32 text into bytes.
///
/// # Errors
///
/// Returns [`CanonError::Base32`] when `text` contains characters outside the
/// lowercase base32 alphabet.
pub fn base32_decode(text: &str) -> Result<Vec<u8>, CanonError> {
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    let mut out = Vec::with_capacity(text.len() * 5 / 8);

    for ch in text.bytes() {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&c| c == ch)
            .ok_or(CanonError::Base32)?;
        buffer = (buffer << 5) | u64::from(value as u8);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Ok(out)
}

// ============================================================================
// SECTION: bech32m
// ============================================================================

/// Encodes `payload` under bech32m with human-readable prefix `hrp`.
///
/// # Errors
///
/// Returns [`CanonError::Bech32`] when `hrp` is not a valid bech32
/// human-readable part, or the combined length exceeds what the checksum
/// algorithm supports.
pub fn bech32m_encode(hrp: &str, payload: &[u8]) -> Result<String, CanonError> {
    let hrp = Hrp::parse(hrp).map_err(|err| CanonError::Bech32(err.to_string()))?;
    bech32::encode::<bech32::Bech32m>(hrp, payload).map_err(|err| CanonError::Bech32(err.to_string()))
}

/// Decodes a bech32m string, returning `(hrp, payload)`.
///
/// # Errors
///
/// Returns [`CanonError::Bech32`] when the checksum is invalid or the string
/// is otherwise malformed.
pub fn bech32m_decode(text: &str) -> Result<(String, Vec<u8>), CanonError> {
    let (hrp, payload) = bech32::decode(text).map_err(|err| CanonError::Bech32(err.to_string()))?;
    Ok((hrp.to_string(), payload))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_bytes_sort_object_keys() {
        let value = json!({"b": 1, "a": 2});
        let bytes = to_canonical_bytes(&value).expect("finite value canonicalizes");
        assert_eq!(String::from_utf8(bytes).expect("utf8"), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn base32_round_trips() {
        let bytes: Vec<u8> = (0u8..=31).collect();
        let encoded = base32_encode(&bytes);
        assert!(encoded.bytes().all(|b| BASE32_ALPHABET.contains(&b)));
        let decoded = base32_decode(&encoded).expect("valid base32");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn base64url_round_trips() {
        let bytes = b"hello workrail";
        let encoded = base64url_encode(bytes);
        assert!(!encoded.contains('='));
        assert_eq!(base64url_decode(&encoded).expect("valid base64url"), bytes);
    }

    #[test]
    fn bech32m_round_trips_with_hrp() {
        let payload = vec![1u8, 2, 3, 4, 5];
        let encoded = bech32m_encode("st", &payload).expect("encodes");
        assert!(encoded.starts_with("st1"));
        let (hrp, decoded) = bech32m_decode(&encoded).expect("decodes");
        assert_eq!(hrp, "st");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn bech32m_detects_corruption() {
        let payload = vec![9u8; 8];
        let mut encoded = bech32m_encode("ack", &payload).expect("encodes");
        let mid = encoded.len() / 2;
        let corrupted_char = if encoded.as_bytes()[mid] == b'q' { 'p' } else { 'q' };
        encoded.replace_range(mid..=mid, &corrupted_char.to_string());
        assert!(bech32m_decode(&encoded).is_err());
    }

    #[test]
    fn hash_canonical_ref_is_deterministic() {
        let value = json!({"x": 1, "y": [1, 2, 3]});
        let first = hash_canonical_ref(&value).expect("hashes");
        let second = hash_canonical_ref(&value).expect("hashes");
        assert_eq!(first, second);
        assert!(first.starts_with("sha256:"));
        assert_eq!(first.len(), "sha256:".len() + 64);
    }

    proptest::proptest! {
        #[test]
        fn base32_round_trips_arbitrary_bytes(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256)) {
            let encoded = base32_encode(&bytes);
            let decoded = base32_decode(&encoded).expect("base32_encode output always decodes");
            proptest::prop_assert_eq!(decoded, bytes);
        }

        #[test]
        fn base64url_round_trips_arbitrary_bytes(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256)) {
            let encoded = base64url_encode(&bytes);
            proptest::prop_assert!(!encoded.contains('='));
            let decoded = base64url_decode(&encoded).expect("base64url_encode output always decodes");
            proptest::prop_assert_eq!(decoded, bytes);
        }

        #[test]
        fn bech32m_round_trips_arbitrary_payloads(payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..128)) {
            let encoded = bech32m_encode("wr", &payload).expect("valid hrp always encodes");
            let (hrp, decoded) = bech32m_decode(&encoded).expect("bech32m_encode output always decodes");
            proptest::prop_assert_eq!(hrp, "wr");
            proptest::prop_assert_eq!(decoded, payload);
        }

        #[test]
        fn canonical_bytes_are_stable_under_key_reordering(a in 0i64..1000, b in 0i64..1000) {
            let forward = json!({"a": a, "b": b});
            let backward = json!({"b": b, "a": a});
            let forward_bytes = to_canonical_bytes(&forward).expect("finite value canonicalizes");
            let backward_bytes = to_canonical_bytes(&backward).expect("finite value canonicalizes");
            proptest::prop_assert_eq!(forward_bytes, backward_bytes);
        }
    }
}
