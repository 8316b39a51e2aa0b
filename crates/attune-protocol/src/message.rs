//! Peer protocol messages.
//!
//! Every protocol frame exchanged between replicas is a [`PeerMessage`]:
//! a shared envelope (sender, phase, done flag) around a protocol-specific
//! payload:
//!
//! - [`PeerBody::Report`] - Ben-Or sub-phase 1: the sender's proposal bit
//! - [`PeerBody::Decide`] - Ben-Or sub-phase 2: the sender's majority value
//! - [`PeerBody::Estimate`] - JACM86: the sender's real-valued estimate

use attune_types::ReplicaId;
use serde::{Deserialize, Serialize};

/// Sentinel decide value meaning "no majority observed".
pub const NO_MAJORITY: i8 = -1;

// ============================================================================
// Message Envelope
// ============================================================================

/// A protocol message with routing information.
///
/// All peer messages are broadcast; the envelope carries the sender's
/// identity, the phase the payload belongs to, and whether the sender's
/// engine has permanently terminated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// The replica that sent this message.
    pub from: ReplicaId,

    /// The phase the payload belongs to.
    pub p: u64,

    /// The protocol-specific payload.
    pub body: PeerBody,

    /// True once the sender's engine has terminated. Done senders keep
    /// broadcasting until the controller shuts them down; receivers use
    /// this flag to count them toward their phase thresholds.
    pub is_done: bool,
}

impl PeerMessage {
    /// Creates a new peer message.
    pub fn new(from: ReplicaId, p: u64, body: PeerBody, is_done: bool) -> Self {
        Self {
            from,
            p,
            body,
            is_done,
        }
    }
}

// ============================================================================
// Message Payload
// ============================================================================

/// Protocol-specific message payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PeerBody {
    /// Ben-Or sub-phase 1 report of the sender's proposal bit (`0` or `1`).
    Report {
        /// The sender's current proposal.
        v: u8,
    },

    /// Ben-Or sub-phase 2 decide value.
    ///
    /// Either a bit (`0` or `1`) or [`NO_MAJORITY`].
    Decide {
        /// The sender's sub-phase 1 outcome.
        w: i8,
    },

    /// JACM86 real-valued estimate in `[0, K]`.
    Estimate {
        /// The sender's current estimate.
        v: f64,
    },
}
