//! Fault-set selection and the UP/DOWN wait schedule.

use std::time::Duration;

use attune_protocol::EngineConfig;
use attune_types::ReplicaId;
use rand::Rng;
use rand::rngs::SmallRng;
use rand::seq::index;
use rand_distr::{Distribution, Gamma};

// ============================================================================
// Fault Plan
// ============================================================================

/// A replica's role for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaRole {
    /// Subject to UP/DOWN cycling only.
    Honest,
    /// Subject to UP/DOWN cycling and permitted to start lying.
    ByzantineEligible,
    /// Permanently crashed at run start.
    Crashed,
}

/// The `f` replicas chosen to misbehave, split by the protocol's
/// capability: Byzantine-capable algorithms get a Byzantine set, the
/// rest get a permanently-crashed set.
#[derive(Debug, Clone)]
pub struct FaultPlan {
    byzantine: Vec<ReplicaId>,
    crashed: Vec<ReplicaId>,
}

impl FaultPlan {
    /// Draws `f` distinct replica ids uniformly without replacement.
    pub fn draw(config: &EngineConfig, rng: &mut SmallRng) -> Self {
        let drawn: Vec<ReplicaId> = index::sample(rng, config.servers as usize, config.f as usize)
            .iter()
            .map(|id| ReplicaId::new(id as u32))
            .collect();

        if config.supports_byzantine() {
            Self {
                byzantine: drawn,
                crashed: Vec::new(),
            }
        } else {
            Self {
                byzantine: Vec::new(),
                crashed: drawn,
            }
        }
    }

    /// The role assigned to a replica.
    pub fn role(&self, id: ReplicaId) -> ReplicaRole {
        if self.crashed.contains(&id) {
            ReplicaRole::Crashed
        } else if self.byzantine.contains(&id) {
            ReplicaRole::ByzantineEligible
        } else {
            ReplicaRole::Honest
        }
    }

    /// The Byzantine-eligible set.
    pub fn byzantine(&self) -> &[ReplicaId] {
        &self.byzantine
    }

    /// The permanently-crashed set.
    pub fn crashed(&self) -> &[ReplicaId] {
        &self.crashed
    }
}

// ============================================================================
// Wait Schedule
// ============================================================================

/// Per-cycle wait sampler for the UP/DOWN control loop.
///
/// Draws from Gamma(shape 3, scale 2) clamped to 10, then rescales:
/// UP intervals stretch to `[0, 20]` seconds, DOWN intervals compress to
/// `[0, 1]` so outages stay short bursts. The shape was picked for the
/// look of the distribution, not for any deeper property.
#[derive(Debug, Clone)]
pub struct WaitSampler {
    gamma: Gamma<f64>,
}

impl WaitSampler {
    pub fn new() -> Self {
        let gamma =
            Gamma::new(3.0, 2.0).expect("static gamma parameters are valid");
        Self { gamma }
    }

    /// Samples the next wait, given whether the replica is currently DOWN.
    pub fn wait(&self, rng: &mut SmallRng, is_down: bool) -> Duration {
        let raw = self.gamma.sample(rng).min(10.0);
        let seconds = if is_down { raw / 10.0 } else { raw * 2.0 };
        Duration::from_secs_f64(seconds)
    }
}

impl Default for WaitSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Sticky Byzantine draw: once a replica starts lying it never stops.
pub fn sample_byzantine(current: bool, byzantine_p: f64, rng: &mut SmallRng) -> bool {
    current || rng.r#gen::<f64>() < byzantine_p
}
