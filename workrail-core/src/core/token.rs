// workrail-core/src/core/token.rs
// ============================================================================
// Module: WorkRail Opaque Token Codec
// Description: Sign and parse the opaque resumption tokens handed back across tool calls.
// Purpose: Carry scope (session/run/node/attempt) without exposing internal state.
// Dependencies: crate::core::canonical, crate::core::identifiers, crate::core::keyring
// ============================================================================

//! ## Overview
//! A token is a compact binary payload — version, kind, and scoping
//! identifiers — HMAC-signed with the active [`Keyring`] key and framed as
//! `bech32m` text under a kind-specific human-readable prefix (`st` for a
//! start token, `ack` for an advance/continue token, `chk` for a checkpoint
//! token). Callers treat the result as opaque; only [`sign`] and [`parse`]
//! understand its layout. Error codes are closed: [`TokenError`] has exactly
//! three variants.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::canonical::bech32m_decode;
use crate::core::canonical::bech32m_encode;
use crate::core::identifiers::AttemptId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::WorkflowHashRef;
use crate::core::keyring::Keyring;

/// The token envelope version this codec currently produces and accepts.
pub const TOKEN_VERSION: u8 = 1;

/// Maximum length, in characters, a minted token is expected to stay under
/// (§4.2's informal size target). Not enforced as a hard cap on parse.
pub const TARGET_MAX_LEN: usize = 170;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// The closed set of errors a token can fail with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The token failed to decode as bech32m, carried an unrecognized version
    /// or kind byte, or its payload did not match the length its kind implies.
    #[error("TOKEN_INVALID_FORMAT: {0}")]
    InvalidFormat(String),
    /// The token decoded cleanly but its signature did not verify against the
    /// current or previous keyring key.
    #[error("TOKEN_BAD_SIGNATURE")]
    BadSignature,
    /// The token verified but does not scope to the session, run, or node the
    /// caller expected it to.
    #[error("TOKEN_SCOPE_MISMATCH: {0}")]
    ScopeMismatch(String),
}

// ============================================================================
// SECTION: Token Kind
// ============================================================================

/// Which tool call a token was minted for; determines its `bech32m` prefix
/// and which optional fields its payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Minted by `start_workflow`; carries no attempt id yet.
    Start,
    /// Minted by `continue_workflow`/`checkpoint_workflow` on a pending step;
    /// carries the attempt id the caller must echo back.
    Ack,
    /// Minted by `checkpoint_workflow`'s rehydration path.
    Checkpoint,
}

impl TokenKind {
    const fn tag(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::Ack => 1,
            Self::Checkpoint => 2,
        }
    }

    const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Start),
            1 => Some(Self::Ack),
            2 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// The `bech32m` human-readable prefix this kind is framed under.
    #[must_use]
    pub const fn hrp(self) -> &'static str {
        match self {
            Self::Start => "st",
            Self::Ack => "ack",
            Self::Checkpoint => "chk",
        }
    }
}

// ============================================================================
// SECTION: Token Payload
// ============================================================================

/// The scoping identifiers a token carries (§4.2).
///
/// # Invariants
/// - `attempt_id` is present only on [`TokenKind::Ack`] tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    /// The kind this payload was minted as.
    pub kind: TokenKind,
    /// The owning session.
    pub session_id: SessionId,
    /// The owning run.
    pub run_id: RunId,
    /// The node the token scopes to.
    pub node_id: NodeId,
    /// The attempt the caller must echo back, for `ack` tokens.
    pub attempt_id: Option<AttemptId>,
    /// A short reference to the pinned workflow hash in effect, if carried.
    pub workflow_hash_ref: Option<WorkflowHashRef>,
}

impl TokenPayload {
    /// Checks this payload's scope against the session/run/node the caller
    /// expects, failing closed on any mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ScopeMismatch`] when any field differs.
    pub fn ensure_scope(&self, session_id: &SessionId, run_id: &RunId, node_id: &NodeId) -> Result<(), TokenError> {
        if &self.session_id != session_id {
            return Err(TokenError::ScopeMismatch("session_id".to_string()));
        }
        if &self.run_id != run_id {
            return Err(TokenError::ScopeMismatch("run_id".to_string()));
        }
        if &self.node_id != node_id {
            return Err(TokenError::ScopeMismatch("node_id".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Binary Framing
// ============================================================================
//
// Layout: [version: u8][kind: u8][presence: u8 bitmask]
//         [len: u8][session_id bytes]
//         [len: u8][run_id bytes]
//         [len: u8][node_id bytes]
//         (if ATTEMPT bit set) [len: u8][attempt_id bytes]
//         (if HASH_REF bit set) [len: u8][workflow_hash_ref bytes]
//
// Identifiers are restricted to `[a-z0-9_-]+` (ASCII) so byte length equals
// character length and a `u8` length prefix is always sufficient in practice.

const PRESENCE_ATTEMPT: u8 = 0b0000_0001;
const PRESENCE_HASH_REF: u8 = 0b0000_0010;

fn push_field(buf: &mut Vec<u8>, value: &str) -> Result<(), TokenError> {
    let bytes = value.as_bytes();
    let len = u8::try_from(bytes.len())
        .map_err(|_| TokenError::InvalidFormat(format!("field too long: {} bytes", bytes.len())))?;
    buf.push(len);
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_field<'a>(bytes: &'a [u8], cursor: &mut usize) -> Result<&'a str, TokenError> {
    let len = *bytes
        .get(*cursor)
        .ok_or_else(|| TokenError::InvalidFormat("truncated field length".to_string()))? as usize;
    *cursor += 1;
    let end = *cursor + len;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| TokenError::InvalidFormat("truncated field body".to_string()))?;
    *cursor = end;
    std::str::from_utf8(slice).map_err(|err| TokenError::InvalidFormat(err.to_string()))
}

fn encode_payload(payload: &TokenPayload) -> Result<Vec<u8>, TokenError> {
    let mut presence = 0u8;
    if payload.attempt_id.is_some() {
        presence |= PRESENCE_ATTEMPT;
    }
    if payload.workflow_hash_ref.is_some() {
        presence |= PRESENCE_HASH_REF;
    }

    let mut buf = Vec::with_capacity(64);
    buf.push(TOKEN_VERSION);
    buf.push(payload.kind.tag());
    buf.push(presence);
    push_field(&mut buf, payload.session_id.as_str())?;
    push_field(&mut buf, payload.run_id.as_str())?;
    push_field(&mut buf, payload.node_id.as_str())?;
    if let Some(attempt_id) = &payload.attempt_id {
        push_field(&mut buf, attempt_id.as_str())?;
    }
    if let Some(hash_ref) = &payload.workflow_hash_ref {
        push_field(&mut buf, hash_ref.as_str())?;
    }
    Ok(buf)
}

fn decode_payload(bytes: &[u8]) -> Result<TokenPayload, TokenError> {
    let version = *bytes
        .first()
        .ok_or_else(|| TokenError::InvalidFormat("empty payload".to_string()))?;
    if version != TOKEN_VERSION {
        return Err(TokenError::InvalidFormat(format!("unsupported token version {version}")));
    }
    let tag = *bytes
        .get(1)
        .ok_or_else(|| TokenError::InvalidFormat("missing kind byte".to_string()))?;
    let kind = TokenKind::from_tag(tag).ok_or_else(|| TokenError::InvalidFormat(format!("unknown token kind {tag}")))?;
    let presence = *bytes
        .get(2)
        .ok_or_else(|| TokenError::InvalidFormat("missing presence byte".to_string()))?;

    let mut cursor = 3usize;
    let session_id = SessionId::new(read_field(bytes, &mut cursor)?);
    let run_id = RunId::new(read_field(bytes, &mut cursor)?);
    let node_id = NodeId::new(read_field(bytes, &mut cursor)?);

    let attempt_id = if presence & PRESENCE_ATTEMPT != 0 {
        Some(AttemptId::new(read_field(bytes, &mut cursor)?))
    } else {
        None
    };
    let workflow_hash_ref = if presence & PRESENCE_HASH_REF != 0 {
        Some(WorkflowHashRef::from(read_field(bytes, &mut cursor)?))
    } else {
        None
    };

    if cursor != bytes.len() {
        return Err(TokenError::InvalidFormat("trailing bytes after payload".to_string()));
    }

    Ok(TokenPayload {
        kind,
        session_id,
        run_id,
        node_id,
        attempt_id,
        workflow_hash_ref,
    })
}

// ============================================================================
// SECTION: Sign & Parse
// ============================================================================

/// Signs `payload` with the keyring's current key and frames it as bech32m
/// text under the kind's human-readable prefix.
///
/// # Errors
///
/// Returns [`TokenError::InvalidFormat`] if a field is too long to frame, or
/// if bech32m encoding itself fails.
pub fn sign(keyring: &Keyring, payload: &TokenPayload) -> Result<String, TokenError> {
    let body = encode_payload(payload)?;
    let signature = keyring.sign(&body);
    let mut framed = body;
    framed.extend_from_slice(&signature);
    bech32m_encode(payload.kind.hrp(), &framed).map_err(|err| TokenError::InvalidFormat(err.to_string()))
}

/// Decodes, verifies, and returns the payload carried by `token`.
///
/// `expected_kind` must match both the bech32m prefix and the payload's own
/// kind byte; this catches a caller presenting e.g. a start token where an
/// ack token was requested.
///
/// # Errors
///
/// Returns [`TokenError::InvalidFormat`] if the token is malformed or framed
/// under the wrong prefix, and [`TokenError::BadSignature`] if it fails to
/// verify against the keyring's current or previous key.
pub fn parse(keyring: &Keyring, expected_kind: TokenKind, token: &str) -> Result<TokenPayload, TokenError> {
    let (hrp, framed) = bech32m_decode(token).map_err(|err| TokenError::InvalidFormat(err.to_string()))?;
    if hrp != expected_kind.hrp() {
        return Err(TokenError::InvalidFormat(format!(
            "expected hrp '{}', got '{hrp}'",
            expected_kind.hrp()
        )));
    }

    let sig_len = crate::core::keyring::KEY_BYTES;
    if framed.len() < sig_len {
        return Err(TokenError::InvalidFormat("token shorter than one signature".to_string()));
    }
    let (body, signature) = framed.split_at(framed.len() - sig_len);

    if !keyring.verify(body, signature) {
        return Err(TokenError::BadSignature);
    }

    let payload = decode_payload(body)?;
    if payload.kind != expected_kind {
        return Err(TokenError::InvalidFormat("payload kind does not match bech32m prefix".to_string()));
    }
    Ok(payload)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keyring::HmacKey;
    use crate::core::keyring::KEY_BYTES;

    fn ring() -> Keyring {
        Keyring::new(HmacKey::from_bytes([7u8; KEY_BYTES]))
    }

    fn sample_payload(kind: TokenKind) -> TokenPayload {
        TokenPayload {
            kind,
            session_id: SessionId::new("sess_abc123"),
            run_id: RunId::new("run_def456"),
            node_id: NodeId::new("node_ghi789"),
            attempt_id: if kind == TokenKind::Ack {
                Some(AttemptId::new("att_001"))
            } else {
                None
            },
            workflow_hash_ref: Some(WorkflowHashRef::from("0123456789abcdef0123456789abcdef")),
        }
    }

    #[test]
    fn sign_then_parse_round_trips() {
        let keyring = ring();
        let payload = sample_payload(TokenKind::Ack);
        let token = sign(&keyring, &payload).expect("signs");
        assert!(token.starts_with("ack1"));
        let parsed = parse(&keyring, TokenKind::Ack, &token).expect("parses");
        assert_eq!(parsed, payload);
    }

    #[test]
    fn start_token_carries_no_attempt_id() {
        let keyring = ring();
        let payload = sample_payload(TokenKind::Start);
        let token = sign(&keyring, &payload).expect("signs");
        let parsed = parse(&keyring, TokenKind::Start, &token).expect("parses");
        assert!(parsed.attempt_id.is_none());
    }

    #[test]
    fn parse_rejects_tampered_signature() {
        let keyring = ring();
        let payload = sample_payload(TokenKind::Start);
        let mut token = sign(&keyring, &payload).expect("signs");
        let last = token.pop().expect("non-empty");
        token.push(if last == 'q' { 'p' } else { 'q' });
        let err = parse(&keyring, TokenKind::Start, &token).expect_err("corrupted token must fail");
        assert!(matches!(err, TokenError::InvalidFormat(_) | TokenError::BadSignature));
    }

    #[test]
    fn parse_rejects_wrong_kind_prefix() {
        let keyring = ring();
        let payload = sample_payload(TokenKind::Start);
        let token = sign(&keyring, &payload).expect("signs");
        let err = parse(&keyring, TokenKind::Ack, &token).expect_err("kind mismatch must fail");
        assert_eq!(err, TokenError::InvalidFormat("expected hrp 'ack', got 'st'".to_string()));
    }

    #[test]
    fn parse_rejects_signature_from_a_different_key() {
        let keyring_a = ring();
        let keyring_b = Keyring::new(HmacKey::from_bytes([9u8; KEY_BYTES]));
        let payload = sample_payload(TokenKind::Checkpoint);
        let token = sign(&keyring_a, &payload).expect("signs");
        let err = parse(&keyring_b, TokenKind::Checkpoint, &token).expect_err("unrelated key must not verify");
        assert_eq!(err, TokenError::BadSignature);
    }

    #[test]
    fn ensure_scope_detects_mismatched_run() {
        let payload = sample_payload(TokenKind::Ack);
        let other_run = RunId::new("run_other");
        let err = payload
            .ensure_scope(&payload.session_id, &other_run, &payload.node_id)
            .expect_err("mismatched run must fail");
        assert_eq!(err, TokenError::ScopeMismatch("run_id".to_string()));
    }

    #[test]
    fn token_stays_under_target_length() {
        let keyring = ring();
        let payload = sample_payload(TokenKind::Ack);
        let token = sign(&keyring, &payload).expect("signs");
        assert!(token.len() <= TARGET_MAX_LEN, "token length {} exceeds target", token.len());
    }

    fn id_fragment() -> impl proptest::strategy::Strategy<Value = String> {
        proptest::string::string_regex("[a-z0-9_-]{1,32}").expect("valid regex")
    }

    proptest::proptest! {
        #[test]
        fn sign_then_parse_round_trips_arbitrary_ack_payloads(
            session in id_fragment(), run in id_fragment(), node in id_fragment(), attempt in id_fragment(),
        ) {
            let keyring = ring();
            let payload = TokenPayload {
                kind: TokenKind::Ack,
                session_id: SessionId::new(session),
                run_id: RunId::new(run),
                node_id: NodeId::new(node),
                attempt_id: Some(AttemptId::new(attempt)),
                workflow_hash_ref: None,
            };
            let token = sign(&keyring, &payload).expect("signs");
            let parsed = parse(&keyring, TokenKind::Ack, &token).expect("parses");
            proptest::prop_assert_eq!(parsed, payload);
        }

        #[test]
        fn parse_never_panics_on_arbitrary_input(garbage in ".{0,256}") {
            let keyring = ring();
            let _ = parse(&keyring, TokenKind::Start, &garbage);
        }
    }
}
