//! DLPSW JACM'86 real-valued approximate agreement.
//!
//! Byzantine-tolerant approximate agreement over reals in `[0, K]`;
//! validity requires `n ≥ 5f + 1`. Phase 0 adopts the mean of the
//! `2f`-trimmed received values and fixes the terminal phase from the
//! observed diameter; subsequent phases adopt
//! `mean(select(trim(F, f), 2f))`. Peers that have announced termination
//! contribute `0` to every later average.
//!
//! There is no future buffer: a message only fills the receiver's vector
//! when its phase matches, though its done flag is always recorded.

use attune_types::ReplicaId;
use rand::Rng;
use rand::rngs::SmallRng;
use tracing::debug;

use crate::engine::{AgreementEngine, EngineConfig, EngineSnapshot, ProtocolError};
use crate::message::{PeerBody, PeerMessage};

/// JACM86 engine state for one replica.
pub struct Jacm86Engine {
    servers: usize,
    f: usize,
    id: ReplicaId,
    eps: f64,

    /// Current estimate.
    v: f64,
    /// Phase counter; monotonically non-decreasing.
    p: u64,
    /// Per-sender estimates for the current phase.
    estimates: Vec<Option<f64>>,
    /// Peers observed announcing termination; contributes to thresholds
    /// and substitutes `0` into averages.
    done_peers: Vec<bool>,
    /// Terminal phase, known after the first convergence step.
    p_end: Option<i64>,
}

impl Jacm86Engine {
    /// Creates an engine with a uniformly random initial estimate in
    /// `[0, K]`.
    pub fn new(config: &EngineConfig, id: ReplicaId, mut rng: SmallRng) -> Result<Self, ProtocolError> {
        let v = rng.gen_range(0.0..=config.k);
        Self::with_initial(config, id, v)
    }

    /// Creates an engine with a fixed initial estimate.
    ///
    /// Used by experiments that control the initial value distribution.
    pub fn with_initial(config: &EngineConfig, id: ReplicaId, v: f64) -> Result<Self, ProtocolError> {
        config.validate()?;
        let mut engine = Self {
            servers: config.servers as usize,
            f: config.f as usize,
            id,
            eps: config.eps,
            v,
            p: 0,
            estimates: Vec::new(),
            done_peers: vec![false; config.servers as usize],
            p_end: None,
        };
        engine.reset();
        Ok(engine)
    }

    /// Clears the estimate vector and reseeds the own slot with `v`.
    fn reset(&mut self) {
        self.estimates = vec![None; self.servers];
        self.estimates[self.id.as_usize()] = Some(self.v);
    }

    /// Filled estimates in index order, after done-peer substitution.
    fn filled(&self) -> Vec<f64> {
        self.estimates.iter().flatten().copied().collect()
    }
}

impl AgreementEngine for Jacm86Engine {
    fn process_message(&mut self, message: &PeerMessage) -> bool {
        if self.is_done() {
            return false;
        }

        let slot = message.from.as_usize();
        if slot >= self.servers {
            return false;
        }
        if message.is_done {
            self.done_peers[slot] = true;
        }
        if message.p == self.p {
            if let PeerBody::Estimate { v } = message.body {
                if self.estimates[slot].is_none() {
                    self.estimates[slot] = Some(v);
                }
            }
        }

        let filled = self.estimates.iter().flatten().count();
        let done = self.done_peers.iter().filter(|&&d| d).count();
        if filled + done < self.servers - self.f {
            return false;
        }

        // Done peers contribute zero to every average.
        for (slot, done) in self.done_peers.iter().enumerate() {
            if *done {
                self.estimates[slot] = Some(0.0);
            }
        }
        let values = self.filled();

        if self.p == 0 {
            self.v = mean(&trim(&values, 2 * self.f));
            let spread = values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                - values.iter().copied().fold(f64::INFINITY, f64::min);
            let base = contraction(self.servers - 3 * self.f, 2 * self.f);
            self.p_end = Some(((spread / self.eps).ln() / base.ln()).ceil() as i64);
            self.p += 1;
            self.reset();
            debug!(
                replica = %self.id,
                phase = self.p,
                v = self.v,
                p_end = self.p_end,
                "advanced via trimmed mean"
            );
            true
        } else if self.p_end.is_some_and(|p_end| self.p as i64 <= p_end) {
            self.v = mean(&select(&trim(&values, self.f), 2 * self.f));
            self.p += 1;
            self.reset();
            debug!(replica = %self.id, phase = self.p, v = self.v, "advanced via select of trimmed values");
            true
        } else {
            false
        }
    }

    fn is_done(&self) -> bool {
        self.p_end.is_some_and(|p_end| self.p as i64 > p_end)
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            p: self.p,
            v: self.v,
            w: None,
            sub_phase: None,
        }
    }

    fn broadcast_body(&self) -> PeerBody {
        PeerBody::Estimate { v: self.v }
    }
}

// ============================================================================
// Numeric Helpers
// ============================================================================

/// Arithmetic mean over IEEE-754 doubles; NaN on an empty slice.
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sorts ascending (stable, ties by original index) and drops the `k`
/// smallest and `k` largest elements.
fn trim(values: &[f64], k: usize) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    if k == 0 {
        sorted
    } else if sorted.len() > 2 * k {
        sorted[k..sorted.len() - k].to_vec()
    } else {
        Vec::new()
    }
}

/// Elements at strided indices `0, k, 2k, …`.
fn select(values: &[f64], k: usize) -> Vec<f64> {
    values.iter().copied().step_by(k.max(1)).collect()
}

/// The contraction factor base `c(m, k) = ⌊(m−1)/k⌋ + 1`.
///
/// Unbounded when `k = 0`: with no Byzantine slots to average across, a
/// single exchange converges.
fn contraction(m: usize, k: usize) -> f64 {
    if k == 0 {
        f64::INFINITY
    } else {
        ((m - 1) / k) as f64 + 1.0
    }
}
