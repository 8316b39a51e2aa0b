//! Error types for the controller.

use thiserror::Error;

/// Controller errors.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// IO error on a socket or the report file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Infeasible protocol configuration.
    ///
    /// Surfaces as exit code 22 at the binary.
    #[error(transparent)]
    Infeasible(#[from] attune_protocol::ProtocolError),

    /// Frame codec error.
    #[error(transparent)]
    Wire(#[from] attune_wire::WireError),

    /// Report serialization error.
    #[error("report serialization error: {0}")]
    Report(#[from] serde_json::Error),
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
