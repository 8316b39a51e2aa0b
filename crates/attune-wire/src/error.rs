//! Error types for frame encoding and decoding.

use thiserror::Error;

/// Wire codec errors.
#[derive(Error, Debug)]
pub enum WireError {
    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An encoded control frame exceeded the fixed frame width.
    #[error("control frame overflows fixed width: {len} > {max}")]
    FrameOverflow {
        /// Encoded payload length.
        len: usize,
        /// The fixed frame width.
        max: usize,
    },

    /// A control frame read yielded the wrong number of bytes.
    #[error("control frame truncated: expected {expected} bytes, got {got}")]
    FrameTruncated {
        /// The fixed frame width.
        expected: usize,
        /// Bytes actually available.
        got: usize,
    },
}

/// Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
