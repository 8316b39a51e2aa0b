//! The controller → replica control frame.
//!
//! Control frames ride a long-lived TCP stream and are padded to a fixed
//! width so the replica can read them with a known length: ASCII JSON,
//! right-justified (space-padded on the left) into exactly
//! [`CONTROL_FRAME_LEN`] bytes.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};

/// Fixed width of an encoded control frame, in bytes.
pub const CONTROL_FRAME_LEN: usize = 1024;

/// Fault state injected into a replica by the controller.
///
/// Frames override the replica's fault flags atomically and in arrival
/// order; `is_done` is a permanent shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControlFrame {
    /// The replica must drop all protocol I/O while set.
    pub is_down: bool,

    /// The replica must corrupt its broadcasts while set.
    pub is_byzantine: bool,

    /// Permanent shutdown request.
    pub is_done: bool,
}

impl ControlFrame {
    /// The initial all-up frame the controller sends once every replica
    /// is ready.
    pub fn startup() -> Self {
        Self::default()
    }

    /// The permanent shutdown frame.
    pub fn shutdown() -> Self {
        Self {
            is_down: true,
            is_byzantine: false,
            is_done: true,
        }
    }

    /// Encodes into the fixed-width wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_string(self)?;
        if json.len() > CONTROL_FRAME_LEN {
            return Err(WireError::FrameOverflow {
                len: json.len(),
                max: CONTROL_FRAME_LEN,
            });
        }
        let mut frame = vec![b' '; CONTROL_FRAME_LEN - json.len()];
        frame.extend_from_slice(json.as_bytes());
        Ok(frame)
    }

    /// Decodes one fixed-width frame.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() != CONTROL_FRAME_LEN {
            return Err(WireError::FrameTruncated {
                expected: CONTROL_FRAME_LEN,
                got: frame.len(),
            });
        }
        let trimmed = frame
            .iter()
            .position(|&b| b != b' ')
            .map_or(&frame[frame.len()..], |start| &frame[start..]);
        Ok(serde_json::from_slice(trimmed)?)
    }
}
