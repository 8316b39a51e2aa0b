//! The engine capability set and factory.
//!
//! The replica runtime depends only on [`AgreementEngine`]: a pure,
//! message-driven state machine that never performs I/O and never blocks.
//! Two implementations exist ([`BenOrEngine`](crate::BenOrEngine) and
//! [`Jacm86Engine`](crate::Jacm86Engine)); [`build_engine`] selects one
//! after validating the configuration's feasibility.

use attune_types::{Algorithm, ReplicaId};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ben_or::BenOrEngine;
use crate::jacm86::Jacm86Engine;
use crate::message::{PeerBody, PeerMessage};

// ============================================================================
// Errors
// ============================================================================

/// Protocol construction errors.
///
/// Engines are total over well-formed messages, so the only failure mode
/// is an infeasible configuration at construction time.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The fault bound is too large for the cluster size.
    #[error("infeasible configuration for {algorithm}: servers={servers}, f={f} (requires {requirement})")]
    Infeasible {
        /// The selected protocol.
        algorithm: Algorithm,
        /// Replica count.
        servers: u32,
        /// Fault bound.
        f: u32,
        /// Human-readable validity precondition.
        requirement: &'static str,
    },
}

/// Result type for engine construction.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// ============================================================================
// Engine Configuration
// ============================================================================

/// Static protocol parameters shared by every engine of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The protocol to run.
    pub algorithm: Algorithm,
    /// Replica count `n`.
    pub servers: u32,
    /// Fault bound `f`.
    pub f: u32,
    /// Convergence tolerance `ε` (JACM86 only).
    pub eps: f64,
    /// Value-domain upper bound `K` (JACM86 only).
    pub k: f64,
}

impl EngineConfig {
    /// Checks the protocol's validity precondition.
    ///
    /// Ben-Or requires `n > 2f`; JACM86 requires `n ≥ 5f + 1`.
    pub fn validate(&self) -> Result<()> {
        let feasible = match self.algorithm {
            Algorithm::BenOr => self.servers > 2 * self.f,
            Algorithm::Jacm86 => self.servers >= 5 * self.f + 1,
        };
        if feasible {
            Ok(())
        } else {
            Err(ProtocolError::Infeasible {
                algorithm: self.algorithm,
                servers: self.servers,
                f: self.f,
                requirement: match self.algorithm {
                    Algorithm::BenOr => "n > 2f",
                    Algorithm::Jacm86 => "n >= 5f + 1",
                },
            })
        }
    }

    /// The `n − f` threshold both protocols advance at.
    pub fn quorum(&self) -> usize {
        (self.servers - self.f) as usize
    }

    /// Whether this configuration tolerates Byzantine replicas.
    pub fn supports_byzantine(&self) -> bool {
        self.algorithm.supports_byzantine(self.servers, self.f)
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Ben-Or sub-phase within a phase `p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubPhase {
    /// Sub-phase 1: broadcast the proposal, collect reports.
    Report,
    /// Sub-phase 2: broadcast the majority value, collect decides.
    Decide,
}

/// A value copy of an engine's observable state, for telemetry.
///
/// The broadcast thread reads snapshots while the inbound handler owns the
/// engine, so this must be a plain value with no references into it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Current phase.
    pub p: u64,
    /// Current proposal (a bit for Ben-Or, a real for JACM86).
    pub v: f64,
    /// Ben-Or intermediate value, when one has been computed this phase.
    pub w: Option<i8>,
    /// Ben-Or sub-phase; `None` for JACM86.
    pub sub_phase: Option<SubPhase>,
}

// ============================================================================
// Engine Capability Set
// ============================================================================

/// A pure, message-driven agreement protocol state machine.
///
/// Engines are created with an initial value, fed messages until
/// [`is_done`](Self::is_done) holds, then discarded; they never rewind and
/// never perform I/O. `process_message` is total over well-formed messages:
/// stale, duplicate, or mismatched input is dropped, never an error.
pub trait AgreementEngine: Send {
    /// Integrates one peer message, possibly advancing state.
    ///
    /// Returns whether the phase counter increased during this call.
    fn process_message(&mut self, message: &PeerMessage) -> bool;

    /// Whether the engine has permanently terminated.
    fn is_done(&self) -> bool;

    /// A value copy of the observable state.
    fn snapshot(&self) -> EngineSnapshot;

    /// The current proposal as a wire payload, ready to broadcast.
    fn broadcast_body(&self) -> PeerBody;
}

/// Builds the engine selected by `config`, validating feasibility first.
///
/// The RNG supplies the engine's initial value (and, for Ben-Or, its coin
/// flips); callers seed it deterministically for reproducible runs.
pub fn build_engine(
    config: &EngineConfig,
    id: ReplicaId,
    rng: SmallRng,
) -> Result<Box<dyn AgreementEngine>> {
    config.validate()?;
    let engine: Box<dyn AgreementEngine> = match config.algorithm {
        Algorithm::BenOr => Box::new(BenOrEngine::new(config, id, rng)?),
        Algorithm::Jacm86 => Box::new(Jacm86Engine::new(config, id, rng)?),
    };
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use test_case::test_case;

    #[test_case(Algorithm::BenOr, 4, 1, true; "ben-or n=4 f=1 feasible")]
    #[test_case(Algorithm::BenOr, 3, 1, false; "ben-or n=3 f=1 infeasible")]
    #[test_case(Algorithm::BenOr, 2, 1, false; "ben-or n=2 f=1 infeasible")]
    #[test_case(Algorithm::Jacm86, 6, 1, true; "jacm86 n=6 f=1 feasible")]
    #[test_case(Algorithm::Jacm86, 5, 1, false; "jacm86 n=5 f=1 infeasible")]
    #[test_case(Algorithm::Jacm86, 1, 0, true; "jacm86 n=1 f=0 feasible")]
    fn feasibility(algorithm: Algorithm, servers: u32, f: u32, feasible: bool) {
        let config = EngineConfig {
            algorithm,
            servers,
            f,
            eps: 0.01,
            k: 1.0,
        };
        assert_eq!(config.validate().is_ok(), feasible);
    }

    #[test]
    fn factory_rejects_infeasible_config() {
        let config = EngineConfig {
            algorithm: Algorithm::BenOr,
            servers: 3,
            f: 1,
            eps: 0.01,
            k: 1.0,
        };
        let result = build_engine(&config, ReplicaId::new(0), SmallRng::seed_from_u64(1));
        assert!(matches!(result, Err(ProtocolError::Infeasible { .. })));
    }

    #[test]
    fn factory_selects_by_algorithm() {
        let config = EngineConfig {
            algorithm: Algorithm::Jacm86,
            servers: 6,
            f: 1,
            eps: 0.01,
            k: 1.0,
        };
        let engine = build_engine(&config, ReplicaId::new(2), SmallRng::seed_from_u64(7)).unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.p, 0);
        assert!(snapshot.sub_phase.is_none());
        assert!((0.0..=1.0).contains(&snapshot.v));
    }

    #[test]
    fn quorum_is_n_minus_f() {
        let config = EngineConfig {
            algorithm: Algorithm::BenOr,
            servers: 7,
            f: 2,
            eps: 0.01,
            k: 1.0,
        };
        assert_eq!(config.quorum(), 5);
    }
}
