//! # attune-replica: Replica runtime for `Attune`
//!
//! Owns one protocol engine and wires it to the run's three channels:
//! peer broadcasts (UDP), the controller's control stream (TCP), and
//! telemetry back to the controller (UDP). Fault behavior is entirely
//! controller-driven through [`FaultFlags`]; when the flags say the
//! replica is Byzantine, outgoing proposals pass through the
//! [`ByzantineMutator`].

pub mod byzantine;
pub mod error;
pub mod flags;
pub mod runtime;

pub use byzantine::ByzantineMutator;
pub use error::{ReplicaError, Result};
pub use flags::FaultFlags;
pub use runtime::ReplicaRuntime;
