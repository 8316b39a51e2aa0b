//! Byzantine broadcast corruption.
//!
//! While a replica's `is_byzantine` flag is set, its outgoing proposals
//! are replaced by adversarial values. Honest receivers must still see a
//! payload of the correct wire shape; only the content lies, drawn
//! uniformly from the payload's value domain.

use attune_protocol::PeerBody;
use rand::Rng;
use rand::rngs::SmallRng;

/// Corrupts outgoing payloads while preserving their wire shape.
#[derive(Debug)]
pub struct ByzantineMutator {
    /// JACM86 value-domain upper bound `K`.
    k: f64,
    rng: SmallRng,
}

impl ByzantineMutator {
    pub fn new(k: f64, rng: SmallRng) -> Self {
        Self { k, rng }
    }

    /// Replaces the payload's value with an adversarial draw.
    pub fn corrupt(&mut self, body: PeerBody) -> PeerBody {
        match body {
            PeerBody::Report { .. } => PeerBody::Report {
                v: self.rng.gen_range(0..=1),
            },
            PeerBody::Decide { .. } => PeerBody::Decide {
                w: self.rng.gen_range(-1..=1),
            },
            PeerBody::Estimate { .. } => PeerBody::Estimate {
                v: self.rng.gen_range(0.0..=self.k),
            },
        }
    }
}
