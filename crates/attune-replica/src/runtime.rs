//! The replica main loop.
//!
//! One replica owns one protocol engine and three concerns, one thread
//! each:
//!
//! - **broadcast** (the calling thread): every `broadcast_period` ms,
//!   send the engine's current proposal to every peer and a telemetry
//!   snapshot to the controller, unless the replica is DOWN.
//! - **peer receiver**: drain the peer socket into the engine; a message
//!   that advances the phase triggers an immediate telemetry snapshot.
//! - **control reader**: apply controller frames to the fault flags; a
//!   permanent `is_done` frame ends the run.
//!
//! The engine itself never blocks and never touches a socket; it lives
//! behind a mutex with the receiver as its single writer, and the
//! broadcast thread only ever takes value-copy snapshots.

use std::io::Read;
use std::net::{TcpStream, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use attune_config::Params;
use attune_protocol::{AgreementEngine, EngineSnapshot, PeerMessage, build_engine};
use attune_types::{ReplicaId, Timestamp};
use attune_wire::{CONTROL_FRAME_LEN, ControlFrame, Telemetry, TelemetrySnapshot, peer};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::{debug, info, warn};

use crate::byzantine::ByzantineMutator;
use crate::error::{ReplicaError, Result};
use crate::flags::FaultFlags;

/// Poll interval for the peer receiver's shutdown check.
const RECV_POLL: Duration = Duration::from_millis(100);

/// A running replica's sockets and shared state.
pub struct ReplicaRuntime {
    id: ReplicaId,
    params: Params,
    engine: Arc<Mutex<Box<dyn AgreementEngine>>>,
    flags: Arc<FaultFlags>,
    peer_socket: Arc<UdpSocket>,
    telemetry: Arc<UdpSocket>,
    control: TcpStream,
    peers: Vec<String>,
}

impl ReplicaRuntime {
    /// Builds the engine, binds the peer and telemetry sockets, and
    /// connects the control stream.
    pub fn new(params: Params, id: ReplicaId) -> Result<Self> {
        let engine_rng = match params.seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(u64::from(u32::from(id)))),
            None => SmallRng::from_entropy(),
        };
        let engine = build_engine(&params.engine_config(), id, engine_rng)?;

        let own_addr = params
            .replica_addr(u32::from(id))
            .ok_or(ReplicaError::AddressMissing(u32::from(id)))?;
        let peer_socket = UdpSocket::bind(&own_addr)?;

        let telemetry = UdpSocket::bind(("0.0.0.0", 0))?;
        telemetry.connect(params.controller_addr())?;

        let control = TcpStream::connect(params.controller_addr())?;

        let peers: Vec<String> = (0..params.servers)
            .filter(|&peer| peer != u32::from(id))
            .filter_map(|peer| params.replica_addr(peer))
            .collect();

        Ok(Self {
            id,
            params,
            engine: Arc::new(Mutex::new(engine)),
            flags: Arc::new(FaultFlags::new()),
            peer_socket: Arc::new(peer_socket),
            telemetry: Arc::new(telemetry),
            control,
            peers,
        })
    }

    /// Runs the replica to completion.
    ///
    /// Emits the ready signal, blocks on the controller's first control
    /// frame, then drives the broadcast loop until a permanent `is_done`
    /// frame (or a dead control stream) ends the run.
    pub fn run(mut self) -> Result<()> {
        self.telemetry.send(&Telemetry::ready(self.id).encode()?)?;
        info!(replica = %self.id, "ready, waiting for controller start");

        let first = read_frame(&mut self.control)?;
        self.flags.apply(&first);
        if self.flags.is_done() {
            // Permanently crashed before the run began: disappear without
            // ever touching the peer channel.
            let snapshot = self.snapshot();
            send_snapshot(&self.telemetry, self.id, snapshot, true);
            info!(replica = %self.id, "permanently crashed by controller");
            return Ok(());
        }
        info!(replica = %self.id, "controller released the start barrier");

        let control_handle = {
            let control = self.control.try_clone()?;
            let flags = Arc::clone(&self.flags);
            thread::spawn(move || control_loop(control, &flags))
        };

        let receiver_handle = {
            let socket = Arc::clone(&self.peer_socket);
            let engine = Arc::clone(&self.engine);
            let flags = Arc::clone(&self.flags);
            let telemetry = Arc::clone(&self.telemetry);
            let id = self.id;
            thread::spawn(move || receive_loop(&socket, &engine, &flags, &telemetry, id))
        };

        self.broadcast_loop()?;

        let _ = receiver_handle.join();
        let _ = control_handle.join();

        // Final telemetry: the replica itself is done, whatever the
        // engine's state.
        let snapshot = self.snapshot();
        send_snapshot(&self.telemetry, self.id, snapshot, true);
        info!(replica = %self.id, "shut down");
        Ok(())
    }

    /// The periodic broadcast / telemetry loop.
    fn broadcast_loop(&mut self) -> Result<()> {
        let mutator_rng = match self.params.seed {
            Some(seed) => SmallRng::seed_from_u64(seed.rotate_left(17) ^ u64::from(u32::from(self.id))),
            None => SmallRng::from_entropy(),
        };
        let mut mutator = ByzantineMutator::new(self.params.k, mutator_rng);
        let period = Duration::from_millis(self.params.broadcast_period);
        let mut peers = self.peers.clone();

        while !self.flags.is_done() {
            thread::sleep(period);
            if self.flags.is_down() || self.flags.is_done() {
                continue;
            }

            let (snapshot, body, engine_done) = {
                let engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
                (engine.snapshot(), engine.broadcast_body(), engine.is_done())
            };
            let body = if self.flags.is_byzantine() {
                mutator.corrupt(body)
            } else {
                body
            };

            let message = PeerMessage::new(self.id, snapshot.p, body, engine_done);
            let payload = peer::encode(&message)?;
            peers.retain(|addr| match self.peer_socket.send_to(&payload, addr) {
                Ok(_) => true,
                Err(error) => {
                    warn!(replica = %self.id, peer = %addr, %error, "dropping unreachable peer");
                    false
                }
            });

            send_snapshot(&self.telemetry, self.id, snapshot, engine_done);
        }
        Ok(())
    }

    fn snapshot(&self) -> EngineSnapshot {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }
}

// ============================================================================
// Thread Bodies
// ============================================================================

/// Reads one fixed-width control frame.
fn read_frame(stream: &mut TcpStream) -> Result<ControlFrame> {
    let mut buf = [0u8; CONTROL_FRAME_LEN];
    stream.read_exact(&mut buf)?;
    Ok(ControlFrame::decode(&buf)?)
}

/// Applies control frames in arrival order until shutdown.
///
/// A dead control stream is treated as a shutdown request: the
/// controller will have marked this replica done on its side too.
fn control_loop(mut stream: TcpStream, flags: &FaultFlags) {
    loop {
        match read_frame(&mut stream) {
            Ok(frame) => {
                debug!(?frame, "control frame applied");
                flags.apply(&frame);
                if frame.is_done {
                    break;
                }
            }
            Err(error) => {
                warn!(%error, "control stream failed, shutting down");
                flags.mark_done();
                break;
            }
        }
    }
}

/// Drains the peer socket into the engine until shutdown.
fn receive_loop(
    socket: &UdpSocket,
    engine: &Mutex<Box<dyn AgreementEngine>>,
    flags: &FaultFlags,
    telemetry: &UdpSocket,
    id: ReplicaId,
) {
    if let Err(error) = socket.set_read_timeout(Some(RECV_POLL)) {
        warn!(%error, "peer socket timeout unsupported, receiver exiting");
        return;
    }
    let mut buf = [0u8; 64 * 1024];
    while !flags.is_done() {
        match socket.recv_from(&mut buf) {
            Ok((len, _)) => {
                if let Some(update) = integrate(engine, flags, id, &buf[..len]) {
                    match update.encode() {
                        Ok(payload) => {
                            if let Err(error) = telemetry.send(&payload) {
                                debug!(%error, "telemetry send failed");
                            }
                        }
                        Err(error) => debug!(%error, "telemetry encode failed"),
                    }
                }
            }
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut => {}
            Err(error) => {
                warn!(%error, "peer socket failed, receiver exiting");
                break;
            }
        }
    }
}

/// Feeds one inbound datagram to the engine.
///
/// Returns the immediate telemetry update to emit when the message
/// advanced the phase. Dropped entirely while DOWN; malformed payloads
/// are silently discarded (Byzantine senders may legally send garbage).
fn integrate(
    engine: &Mutex<Box<dyn AgreementEngine>>,
    flags: &FaultFlags,
    id: ReplicaId,
    payload: &[u8],
) -> Option<Telemetry> {
    if flags.is_down() {
        return None;
    }
    let message = match peer::decode(payload) {
        Ok(message) => message,
        Err(error) => {
            debug!(%error, "malformed peer frame dropped");
            return None;
        }
    };

    let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
    let advanced = engine.process_message(&message);
    if !advanced {
        return None;
    }
    let snapshot = engine.snapshot();
    let is_done = engine.is_done();
    drop(engine);

    Some(Telemetry::Snapshot(TelemetrySnapshot {
        id,
        p: snapshot.p,
        v: snapshot.v,
        w: snapshot.w,
        converged: false,
        is_done,
        time_generated: Timestamp::now(),
    }))
}

/// Emits one periodic telemetry snapshot; send failures are logged and
/// otherwise ignored (telemetry is best-effort).
fn send_snapshot(telemetry: &UdpSocket, id: ReplicaId, snapshot: EngineSnapshot, is_done: bool) {
    let frame = Telemetry::Snapshot(TelemetrySnapshot {
        id,
        p: snapshot.p,
        v: snapshot.v,
        w: snapshot.w,
        converged: false,
        is_done,
        time_generated: Timestamp::now(),
    });
    match frame.encode() {
        Ok(payload) => {
            if let Err(error) = telemetry.send(&payload) {
                debug!(%error, "telemetry send failed");
            }
        }
        Err(error) => debug!(%error, "telemetry encode failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attune_protocol::{BenOrEngine, EngineConfig, NO_MAJORITY, PeerBody};
    use attune_types::Algorithm;

    fn test_engine() -> Arc<Mutex<Box<dyn AgreementEngine>>> {
        let config = EngineConfig {
            algorithm: Algorithm::BenOr,
            servers: 4,
            f: 1,
            eps: 0.01,
            k: 1.0,
        };
        let engine = BenOrEngine::with_initial(
            &config,
            ReplicaId::new(0),
            0,
            SmallRng::seed_from_u64(0),
        )
        .unwrap();
        Arc::new(Mutex::new(Box::new(engine) as Box<dyn AgreementEngine>))
    }

    fn encoded(from: u32, p: u64, body: PeerBody) -> Vec<u8> {
        peer::encode(&PeerMessage::new(ReplicaId::new(from), p, body, false)).unwrap()
    }

    #[test]
    fn integrate_drops_everything_while_down() {
        let engine = test_engine();
        let flags = FaultFlags::new();
        flags.apply(&ControlFrame {
            is_down: true,
            is_byzantine: false,
            is_done: false,
        });

        let payload = encoded(1, 0, PeerBody::Report { v: 1 });
        assert!(integrate(&engine, &flags, ReplicaId::new(0), &payload).is_none());
        let guard = engine.lock().unwrap();
        assert_eq!(guard.snapshot().p, 0);
    }

    #[test]
    fn integrate_drops_malformed_payloads() {
        let engine = test_engine();
        let flags = FaultFlags::new();
        assert!(integrate(&engine, &flags, ReplicaId::new(0), b"garbage").is_none());
    }

    #[test]
    fn integrate_reports_phase_advances() {
        let engine = test_engine();
        let flags = FaultFlags::new();
        let id = ReplicaId::new(0);

        // Reports then decides for phase 0; the last decide advances.
        assert!(integrate(&engine, &flags, id, &encoded(1, 0, PeerBody::Report { v: 0 })).is_none());
        assert!(integrate(&engine, &flags, id, &encoded(2, 0, PeerBody::Report { v: 1 })).is_none());
        assert!(
            integrate(&engine, &flags, id, &encoded(1, 0, PeerBody::Decide { w: 1 })).is_none()
        );
        let update = integrate(
            &engine,
            &flags,
            id,
            &encoded(2, 0, PeerBody::Decide { w: NO_MAJORITY }),
        );
        match update {
            Some(Telemetry::Snapshot(snapshot)) => {
                assert_eq!(snapshot.id, id);
                assert_eq!(snapshot.p, 1);
                assert!(!snapshot.converged);
            }
            other => panic!("expected a snapshot update, got {other:?}"),
        }
    }
}
