//! # attune-config: Run parameters for `Attune`
//!
//! Loads the JSON parameter file shared by the controller and every
//! replica of a run, validates it, and derives the paths and addresses
//! the rest of the harness consumes. Replica addresses are opaque
//! strings; how the deployment numbers them is not this crate's concern.

use std::fs;
use std::path::{Path, PathBuf};

use attune_protocol::EngineConfig;
use attune_types::Algorithm;
use serde::{Deserialize, Serialize};

mod error;

pub use error::{ConfigError, Result};

/// Parameters of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    /// Replica count `n`.
    pub servers: u32,

    /// Fault bound `f`.
    pub f: u32,

    /// Convergence tolerance `ε`.
    pub eps: f64,

    /// Value-domain upper bound `K` (JACM86 initial values are drawn
    /// from `[0, K]`).
    #[serde(rename = "K", default = "default_k")]
    pub k: f64,

    /// The protocol to run.
    pub algorithm: Algorithm,

    /// Per-cycle probability that a Byzantine-eligible replica starts
    /// lying (sticky once set).
    pub byzantine_p: f64,

    /// Replica broadcast period, in milliseconds.
    pub broadcast_period: u64,

    /// Address the controller binds its control listener and telemetry
    /// socket on.
    pub controller_ip: String,

    /// Port for both the TCP control listener and the UDP telemetry
    /// socket.
    pub controller_port: u16,

    /// One opaque address string per replica id, deployment-derived.
    pub replica_ips: Vec<String>,

    /// Port every replica binds its peer protocol socket on.
    pub replica_port: u16,

    /// Address of the external log transport; accepted here, consumed by
    /// the deployment's logging setup.
    #[serde(default)]
    pub logging_server_ip: Option<String>,

    /// Force shutdown as soon as every replica reports convergence.
    #[serde(default)]
    pub terminate_on_p_agreement: bool,

    /// Base seed for deterministic runs; absent means seed from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_k() -> f64 {
    1.0
}

impl Params {
    /// Loads and validates a parameter file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&raw)?;
        params.validate()?;
        Ok(params)
    }

    /// Validates field ranges and cross-field consistency.
    ///
    /// Protocol feasibility (`n > 2f`, `n ≥ 5f + 1`) is the protocol
    /// crate's contract and is checked at engine construction.
    pub fn validate(&self) -> Result<()> {
        if self.servers == 0 {
            return Err(ConfigError::InvalidReplicaCount(self.servers));
        }
        if self.replica_ips.len() != self.servers as usize {
            return Err(ConfigError::AddressCountMismatch {
                expected: self.servers,
                got: self.replica_ips.len(),
            });
        }
        if !(self.eps > 0.0) {
            return Err(ConfigError::InvalidEps(self.eps));
        }
        if !(self.k > 0.0) {
            return Err(ConfigError::InvalidValueBound(self.k));
        }
        if !(0.0..=1.0).contains(&self.byzantine_p) {
            return Err(ConfigError::InvalidByzantineP(self.byzantine_p));
        }
        if self.broadcast_period == 0 {
            return Err(ConfigError::InvalidBroadcastPeriod(self.broadcast_period));
        }
        Ok(())
    }

    /// The protocol parameters the engines consume.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            algorithm: self.algorithm,
            servers: self.servers,
            f: self.f,
            eps: self.eps,
            k: self.k,
        }
    }

    /// The controller's listen / telemetry address.
    pub fn controller_addr(&self) -> String {
        format!("{}:{}", self.controller_ip, self.controller_port)
    }

    /// A replica's peer protocol address, by id.
    pub fn replica_addr(&self, id: u32) -> Option<String> {
        self.replica_ips
            .get(id as usize)
            .map(|ip| format!("{}:{}", ip, self.replica_port))
    }

    /// The replica id a control connection's source address belongs to.
    pub fn replica_id_for_ip(&self, ip: &str) -> Option<u32> {
        self.replica_ips
            .iter()
            .position(|candidate| candidate == ip)
            .map(|id| id as u32)
    }

    /// The directory run reports for this parameter set land in.
    pub fn report_dir(&self) -> PathBuf {
        PathBuf::from("data").join(format!(
            "{}_nServers_{}_f_{}_eps_{}_byzantineP_{}_bcastPeriod_{}",
            self.algorithm,
            self.servers,
            self.f,
            self.eps,
            self.byzantine_p,
            self.broadcast_period,
        ))
    }
}
