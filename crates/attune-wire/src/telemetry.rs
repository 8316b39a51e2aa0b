//! The replica → controller telemetry frame.
//!
//! Telemetry rides variable-length JSON datagrams. A replica emits one
//! [`Telemetry::Ready`] before the run starts, then periodic (and
//! phase-advance) [`Telemetry::Snapshot`]s until shutdown.

use attune_types::{ReplicaId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A telemetry datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Telemetry {
    /// One-shot start-of-run signal; the controller holds every replica
    /// at the ready barrier until all have sent this.
    Ready {
        /// The reporting replica.
        id: ReplicaId,
        /// Always `true` on the wire.
        ready: bool,
    },

    /// Periodic state snapshot.
    Snapshot(TelemetrySnapshot),
}

impl Telemetry {
    /// Creates the ready signal for a replica.
    pub fn ready(id: ReplicaId) -> Self {
        Self::Ready { id, ready: true }
    }

    /// The reporting replica's id.
    pub fn id(&self) -> ReplicaId {
        match self {
            Self::Ready { id, .. } => *id,
            Self::Snapshot(snapshot) => snapshot.id,
        }
    }

    /// Encodes into a datagram payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes one datagram payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Observable replica state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// The reporting replica.
    pub id: ReplicaId,

    /// Current phase.
    pub p: u64,

    /// Current proposal (a bit for Ben-Or, a real for JACM86).
    pub v: f64,

    /// Ben-Or intermediate value, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<i8>,

    /// Convergence hook for higher-level analysis; the engines leave it
    /// unset.
    #[serde(default)]
    pub converged: bool,

    /// Whether the replica's engine has permanently terminated.
    pub is_done: bool,

    /// Wall-clock time the replica generated this snapshot.
    pub time_generated: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_round_trip() {
        let original = Telemetry::ready(ReplicaId::new(4));
        let decoded = Telemetry::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.id(), ReplicaId::new(4));
    }

    #[test]
    fn snapshot_round_trip() {
        let original = Telemetry::Snapshot(TelemetrySnapshot {
            id: ReplicaId::new(2),
            p: 5,
            v: 0.75,
            w: Some(-1),
            converged: false,
            is_done: true,
            time_generated: Timestamp::new(1_700_000_000_000),
        });
        let decoded = Telemetry::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn snapshot_without_w_omits_the_field() {
        let snapshot = Telemetry::Snapshot(TelemetrySnapshot {
            id: ReplicaId::new(0),
            p: 0,
            v: 0.5,
            w: None,
            converged: false,
            is_done: false,
            time_generated: Timestamp::new(1),
        });
        let json = String::from_utf8(snapshot.encode().unwrap()).unwrap();
        assert!(!json.contains("\"w\""));
        let decoded = Telemetry::decode(json.as_bytes()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn ready_and_snapshot_disambiguate() {
        let ready = Telemetry::decode(br#"{"id": 1, "ready": true}"#).unwrap();
        assert!(matches!(ready, Telemetry::Ready { .. }));

        let snapshot = Telemetry::decode(
            br#"{"id": 1, "p": 3, "v": 0.25, "converged": false, "is_done": false, "time_generated": 9}"#,
        )
        .unwrap();
        assert!(matches!(snapshot, Telemetry::Snapshot(_)));
    }

    #[test]
    fn frame_without_id_is_rejected() {
        assert!(Telemetry::decode(br#"{"ready": true}"#).is_err());
        assert!(Telemetry::decode(b"not json").is_err());
    }
}
