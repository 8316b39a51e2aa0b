//! Error types for parameter loading.

use thiserror::Error;

/// Configuration errors.
///
/// All of these are fatal at startup; nothing here is recoverable
/// mid-run.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading the parameter file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parameter file failed to parse.
    #[error("parameter file error: {0}")]
    Json(#[from] serde_json::Error),

    /// Replica count must be at least one.
    #[error("invalid replica count: {0} (must be >= 1)")]
    InvalidReplicaCount(u32),

    /// One address per replica is required.
    #[error("replica address count mismatch: {got} addresses for {expected} replicas")]
    AddressCountMismatch {
        /// Replica count.
        expected: u32,
        /// Addresses supplied.
        got: usize,
    },

    /// The convergence tolerance must be positive.
    #[error("invalid eps: {0} (must be > 0)")]
    InvalidEps(f64),

    /// The value-domain bound must be positive.
    #[error("invalid K: {0} (must be > 0)")]
    InvalidValueBound(f64),

    /// Byzantine probability must be a probability.
    #[error("invalid byzantine_p: {0} (must be in [0, 1])")]
    InvalidByzantineP(f64),

    /// The broadcast period must be positive.
    #[error("invalid broadcast_period: {0} ms (must be >= 1)")]
    InvalidBroadcastPeriod(u64),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
