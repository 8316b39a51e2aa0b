//! The peer protocol frame.
//!
//! Peer messages are JSON datagrams on the broadcast channel. The envelope
//! and payload live in `attune-protocol`; this module only fixes the wire
//! encoding.

use attune_protocol::PeerMessage;

use crate::error::Result;

/// Encodes a peer message into a datagram payload.
pub fn encode(message: &PeerMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes one datagram payload.
pub fn decode(payload: &[u8]) -> Result<PeerMessage> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attune_protocol::{NO_MAJORITY, PeerBody};
    use attune_types::ReplicaId;
    use proptest::prelude::*;

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(decode(b"{}").is_err());
        assert!(decode(b"\xff\xfe").is_err());
    }

    #[test]
    fn decide_sentinel_round_trip() {
        let message = PeerMessage::new(
            ReplicaId::new(1),
            2,
            PeerBody::Decide { w: NO_MAJORITY },
            true,
        );
        let decoded = decode(&encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    proptest! {
        #[test]
        fn report_frames_round_trip(from in 0u32..64, p in 0u64..1024, v in 0u8..=1, is_done: bool) {
            let message = PeerMessage::new(ReplicaId::new(from), p, PeerBody::Report { v }, is_done);
            let decoded = decode(&encode(&message).unwrap()).unwrap();
            prop_assert_eq!(decoded, message);
        }

        #[test]
        fn estimate_frames_round_trip(from in 0u32..64, p in 0u64..1024, v in 0.0f64..=1.0) {
            let message = PeerMessage::new(ReplicaId::new(from), p, PeerBody::Estimate { v }, false);
            let decoded = decode(&encode(&message).unwrap()).unwrap();
            prop_assert_eq!(decoded, message);
        }
    }
}
