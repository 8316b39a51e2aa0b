//! # attune-controller: Fault orchestration for `Attune` runs
//!
//! The controller sits at the root of the run's star topology. It holds
//! one control stream per replica, drives time-varying UP/DOWN and
//! Byzantine state into each, listens for telemetry, detects global
//! termination, and persists the run report.
//!
//! Key pieces:
//!
//! - [`FaultPlan`] / [`WaitSampler`] - role assignment and the Gamma wait
//!   schedule
//! - [`RunBoards`] / [`TelemetryLog`] - shared run state (mutex-guarded,
//!   set-true-only boards; append-only history)
//! - [`Controller`] - the supervisor itself
//! - [`RunReport`] - the persisted result document

pub mod boards;
pub mod error;
pub mod fault;
pub mod report;
pub mod supervisor;

pub use boards::{PhaseAgreement, RunBoards, TelemetryLog, TelemetryRecord};
pub use error::{ControllerError, Result};
pub use fault::{FaultPlan, ReplicaRole, WaitSampler};
pub use report::RunReport;
pub use supervisor::Controller;
