// workrail-core/src/core/identifiers.rs
// ============================================================================
// Module: WorkRail Identifiers
// Description: Branded newtype identifiers for sessions, runs, nodes, and refs.
// Purpose: Prevent cross-kind identifier confusion at the type level.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every identifier in WorkRail is a distinct newtype over `String` so that a
//! `SessionId` can never be passed where a `NodeId` is expected. All string
//! identifiers are restricted to the delimiter-safe character class
//! `[a-z0-9_-]+`; content-addressed refs additionally carry a `sha256:`
//! prefix and are validated by [`validate_id`] / [`validate_hash_ref`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Character Class Validation
// ============================================================================

/// Returns `true` if `s` matches `[a-z0-9_-]+` and is non-empty.
#[must_use]
pub fn is_valid_id_str(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// Returns `true` if `s` is `sha256:` followed by exactly 64 lowercase hex digits.
#[must_use]
pub fn is_valid_hash_ref_str(s: &str) -> bool {
    let Some(hex) = s.strip_prefix("sha256:") else {
        return false;
    };
    hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

// ============================================================================
// SECTION: Macro: Branded Identifier
// ============================================================================

macro_rules! brand_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw string as this identifier kind without validation.
            ///
            /// Callers that accept untrusted input should validate with
            /// [`is_valid_id_str`] first.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier's string representation.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

brand_id!(SessionId, "A session identifier: `sess_<base32-of-16-random-bytes>`.");
brand_id!(RunId, "A run identifier within a session.");
brand_id!(NodeId, "A node identifier within a run DAG.");
brand_id!(AttemptId, "An attempt identifier correlating one try at a pending step.");
brand_id!(EventId, "A globally-unique event identifier.");
brand_id!(WorkflowId, "An opaque identifier naming a workflow definition, as supplied by the caller.");
brand_id!(StepId, "A step identifier as declared by a pinned workflow.");
brand_id!(LoopId, "A loop identifier as declared by a pinned workflow.");
brand_id!(GapId, "A gap record identifier.");
brand_id!(OutputId, "A node output identifier, unique within its (node, channel).");

// ============================================================================
// SECTION: Content-Addressed Refs
// ============================================================================

macro_rules! brand_hash_ref {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a `sha256:<64-hex>` string as this ref kind without validation.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the ref's string representation.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns the bare 64-hex digest, without the `sha256:` prefix.
            #[must_use]
            pub fn hex(&self) -> &str {
                self.0.strip_prefix("sha256:").unwrap_or(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

brand_hash_ref!(SnapshotRef, "`sha256:<64-hex>` of JCS-canonical execution snapshot bytes.");
brand_hash_ref!(WorkflowHash, "`sha256:<64-hex>` of a canonical compiled workflow.");

/// A short opaque reference derived from a [`WorkflowHash`], carried inside
/// tokens to keep them small. Distinct from `WorkflowHash` itself: it is not
/// required to be reversible, only stable per workflow revision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowHashRef(String);

impl WorkflowHashRef {
    /// Derives a `WorkflowHashRef` by taking the first 32 hex characters of a
    /// `WorkflowHash`'s digest.
    #[must_use]
    pub fn from_hash(hash: &WorkflowHash) -> Self {
        Self(hash.hex()[..32].to_string())
    }

    /// Returns the ref's string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowHashRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for WorkflowHashRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// SECTION: Step Instance Key
// ============================================================================

/// One frame of loop context: `{loopId, iteration}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LoopFrame {
    /// The loop identifier.
    pub loop_id: LoopId,
    /// The 0-based iteration number within this loop.
    pub iteration: u64,
}

/// A step occurrence within its loop context: `loopId@iter/loopId@iter::stepId`,
/// or bare `stepId` when not inside any loop.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepInstanceKey(String);

impl StepInstanceKey {
    /// Encodes a step instance key from its step id and loop path.
    #[must_use]
    pub fn encode(step_id: &StepId, loop_path: &[LoopFrame]) -> Self {
        if loop_path.is_empty() {
            return Self(step_id.as_str().to_string());
        }
        let prefix = loop_path
            .iter()
            .map(|frame| format!("{}@{}", frame.loop_id, frame.iteration))
            .collect::<Vec<_>>()
            .join("/");
        Self(format!("{prefix}::{step_id}"))
    }

    /// Returns the raw encoded string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_char_class_accepts_only_lowercase_alnum_dash_underscore() {
        assert!(is_valid_id_str("sess_ab12_cd-34"));
        assert!(!is_valid_id_str(""));
        assert!(!is_valid_id_str("Sess_AB"));
        assert!(!is_valid_id_str("sess:ab"));
        assert!(!is_valid_id_str("sess/ab"));
    }

    #[test]
    fn hash_ref_requires_64_lowercase_hex() {
        let good = format!("sha256:{}", "a".repeat(64));
        assert!(is_valid_hash_ref_str(&good));
        assert!(!is_valid_hash_ref_str("sha256:ABCD"));
        assert!(!is_valid_hash_ref_str(&"a".repeat(64)));
    }

    #[test]
    fn step_instance_key_encodes_bare_and_nested_loops() {
        let step = StepId::new("triage");
        assert_eq!(StepInstanceKey::encode(&step, &[]).as_str(), "triage");

        let frame = LoopFrame {
            loop_id: LoopId::new("retry_loop"),
            iteration: 2,
        };
        assert_eq!(
            StepInstanceKey::encode(&step, &[frame]).as_str(),
            "retry_loop@2::triage"
        );
    }
}
