//! # attune-protocol: Pure agreement engines for `Attune`
//!
//! The protocol core of the harness: two message-driven state machines
//! behind one capability set.
//!
//! - [`BenOrEngine`] - Ben-Or randomized binary agreement (crash-fault
//!   tolerant, `n > 2f`)
//! - [`Jacm86Engine`] - DLPSW JACM'86 real-valued approximate agreement
//!   (Byzantine-tolerant, `n ≥ 5f + 1`)
//!
//! Engines are pure: they never perform I/O, never block, and are total
//! over well-formed messages. The replica runtime owns one engine and
//! feeds it inbound [`PeerMessage`]s; everything else (sockets, timers,
//! fault flags) lives outside this crate.

pub mod ben_or;
pub mod engine;
pub mod jacm86;
pub mod message;


pub use ben_or::BenOrEngine;
pub use engine::{
    AgreementEngine, EngineConfig, EngineSnapshot, ProtocolError, Result, SubPhase, build_engine,
};
pub use jacm86::Jacm86Engine;
pub use message::{NO_MAJORITY, PeerBody, PeerMessage};
