// workrail-store-fs/src/ids.rs
// ============================================================================
// Module: Random Identifier Factory
// Description: rand-backed implementation of workrail_core::ports::IdFactory.
// Purpose: Mint session/run/node/attempt/event/output/gap identifiers.
// Dependencies: workrail-core, rand
// ============================================================================

//! ## Overview
//! Every minted id is `<prefix>_<base32-of-16-random-bytes>`, matching the
//! shape [`SessionId`](workrail_core::core::identifiers::SessionId)'s own doc
//! comment describes. 16 bytes of CSPRNG output give a collision probability
//! far below anything this system needs to defend against.

use rand::RngCore;
use rand::rngs::OsRng;

use workrail_core::core::canonical::base32_encode;
use workrail_core::core::identifiers::AttemptId;
use workrail_core::core::identifiers::EventId;
use workrail_core::core::identifiers::GapId;
use workrail_core::core::identifiers::NodeId;
use workrail_core::core::identifiers::OutputId;
use workrail_core::core::identifiers::RunId;
use workrail_core::core::identifiers::SessionId;
use workrail_core::ports::IdFactory;

/// Mints fresh identifiers from a CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdFactory;

impl RandomIdFactory {
    /// Builds a new random id factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Generates `<prefix>_<base32-of-16-random-bytes>`.
fn mint(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("{prefix}_{}", base32_encode(&bytes))
}

impl IdFactory for RandomIdFactory {
    fn new_session_id(&self) -> SessionId {
        SessionId::new(mint("sess"))
    }

    fn new_run_id(&self) -> RunId {
        RunId::new(mint("run"))
    }

    fn new_node_id(&self) -> NodeId {
        NodeId::new(mint("node"))
    }

    fn new_attempt_id(&self) -> AttemptId {
        AttemptId::new(mint("att"))
    }

    fn new_event_id(&self) -> EventId {
        EventId::new(mint("evt"))
    }

    fn new_output_id(&self) -> OutputId {
        OutputId::new(mint("out"))
    }

    fn new_gap_id(&self) -> GapId {
        GapId::new(mint("gap"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_carry_the_expected_prefix_and_are_distinct() {
        let factory = RandomIdFactory::new();
        let a = factory.new_session_id();
        let b = factory.new_session_id();
        assert!(a.as_str().starts_with("sess_"));
        assert_ne!(a, b);
    }

    #[test]
    fn every_kind_mints_its_own_prefix() {
        let factory = RandomIdFactory::new();
        assert!(factory.new_run_id().as_str().starts_with("run_"));
        assert!(factory.new_node_id().as_str().starts_with("node_"));
        assert!(factory.new_attempt_id().as_str().starts_with("att_"));
        assert!(factory.new_event_id().as_str().starts_with("evt_"));
        assert!(factory.new_output_id().as_str().starts_with("out_"));
        assert!(factory.new_gap_id().as_str().starts_with("gap_"));
    }
}
