//! # attune-types: Core types for `Attune`
//!
//! This crate contains shared types used across the `Attune` harness:
//! - Replica identity ([`ReplicaId`])
//! - Temporal types ([`Timestamp`])
//! - Protocol selection ([`Algorithm`])

use std::fmt::{Debug, Display};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================================================
// Replica Identity
// ============================================================================

/// Unique identifier for a replica, in `[0, n)` for an n-replica run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Index into per-replica vectors (`R`, `S`, done boards).
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ReplicaId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ReplicaId> for u32 {
    fn from(id: ReplicaId) -> Self {
        id.0
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Wall-clock timestamp in milliseconds since the Unix epoch.
///
/// Telemetry carries two of these per snapshot: the generation time stamped
/// by the replica and the receipt time stamped by the controller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================================================
// Algorithm Selection
// ============================================================================

/// The agreement protocol a run exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Ben-Or randomized binary agreement (crash-fault tolerant).
    BenOr,
    /// DLPSW JACM'86 real-valued approximate agreement (Byzantine-tolerant).
    Jacm86,
}

impl Algorithm {
    /// Whether this protocol tolerates Byzantine replicas at the given
    /// cluster size.
    ///
    /// The controller uses this to decide whether the `f` drawn replicas
    /// become the Byzantine set or the permanently-crashed set.
    pub fn supports_byzantine(self, servers: u32, f: u32) -> bool {
        match self {
            Self::BenOr => false,
            Self::Jacm86 => servers >= 5 * f + 1,
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BenOr => write!(f, "ben-or"),
            Self::Jacm86 => write!(f, "jacm86"),
        }
    }
}
