//! Error types for the replica runtime.

use thiserror::Error;

/// Replica runtime errors.
///
/// These surface only during startup and shutdown; mid-run transport
/// failures are handled in place (log, drop the peer, or terminate).
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// IO error on a socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Infeasible protocol configuration.
    #[error(transparent)]
    Protocol(#[from] attune_protocol::ProtocolError),

    /// Frame codec error.
    #[error(transparent)]
    Wire(#[from] attune_wire::WireError),

    /// No address configured for this replica id.
    #[error("no address configured for replica {0}")]
    AddressMissing(u32),
}

/// Result type for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;
