//! # attune-wire: Wire frames for `Attune`
//!
//! The three frame kinds the harness puts on the network:
//!
//! - [`ControlFrame`] - controller → replica, fixed 1024-byte JSON over TCP
//! - [`Telemetry`] - replica → controller, variable-length JSON datagram
//! - [`peer`] - replica ↔ replica protocol frames, JSON datagrams
//!
//! Codecs are total in the decode direction: malformed input yields a
//! [`WireError`], which callers treat as a silently-droppable frame
//! (Byzantine senders may legally send garbage).

pub mod control;
pub mod error;
pub mod peer;
pub mod telemetry;

pub use control::{CONTROL_FRAME_LEN, ControlFrame};
pub use error::{Result, WireError};
pub use telemetry::{Telemetry, TelemetrySnapshot};
