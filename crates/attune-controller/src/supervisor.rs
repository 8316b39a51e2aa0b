//! The run supervisor.
//!
//! One controller drives a whole run:
//!
//! 1. Bind the telemetry socket and the control listener, accept one
//!    control connection per replica, and hold everyone at the ready
//!    barrier.
//! 2. Release the barrier, draw the fault plan, and spawn one
//!    supervisory thread per replica (UP/DOWN cycling for honest and
//!    Byzantine-eligible replicas, a single permanent crash frame for
//!    the crashed set).
//! 3. When the telemetry listener has marked every replica done,
//!    broadcast the permanent shutdown frame and persist the run report.

use std::io::Write;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use attune_config::Params;
use attune_types::{ReplicaId, Timestamp};
use attune_wire::{ControlFrame, Telemetry};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::boards::{RunBoards, TelemetryLog};
use crate::error::Result;
use crate::fault::{FaultPlan, ReplicaRole, WaitSampler, sample_byzantine};
use crate::report::RunReport;

/// Granularity of the done-board check inside a wait cycle.
const DONE_POLL: Duration = Duration::from_millis(500);

/// Granularity of the ready-barrier check.
const READY_POLL: Duration = Duration::from_millis(100);

/// Telemetry read timeout; also bounds listener shutdown latency.
const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrates one run end to end.
pub struct Controller {
    params: Params,
    run_id: String,
    rng: SmallRng,
}

impl Controller {
    /// Validates protocol feasibility before any socket is opened.
    ///
    /// An infeasible `(algorithm, n, f)` combination surfaces here and
    /// becomes exit code 22 at the binary.
    pub fn new(params: Params, run_id: String) -> Result<Self> {
        params.engine_config().validate()?;
        let rng = match params.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self {
            params,
            run_id,
            rng,
        })
    }

    /// Runs to completion and returns the path of the persisted report.
    pub fn run(mut self, report_base: &Path) -> Result<PathBuf> {
        let servers = self.params.servers as usize;
        let boards = Arc::new(RunBoards::new(
            servers,
            self.params.terminate_on_p_agreement,
        ));
        let log = Arc::new(TelemetryLog::new(servers));

        // The telemetry socket must be listening before any replica sends
        // its ready signal.
        let telemetry_socket = UdpSocket::bind(self.params.controller_addr())?;
        let listener_handle = {
            let boards = Arc::clone(&boards);
            let log = Arc::clone(&log);
            thread::spawn(move || listener_loop(&telemetry_socket, &boards, &log))
        };

        let control_listener = TcpListener::bind(self.params.controller_addr())?;
        info!(addr = %self.params.controller_addr(), "waiting for replicas to connect");
        let mut streams = self.accept_replicas(&control_listener)?;

        while !boards.all_ready() {
            thread::sleep(READY_POLL);
        }
        info!("all replicas ready");

        // Release the start barrier.
        let first_started = Timestamp::now();
        for stream in &mut streams {
            send_frame(stream, ControlFrame::startup());
        }
        let all_started = Timestamp::now();
        info!("all replicas started");

        let plan = FaultPlan::draw(&self.params.engine_config(), &mut self.rng);
        info!(byzantine = ?plan.byzantine(), crashed = ?plan.crashed(), "fault plan drawn");

        let mut supervisors = Vec::with_capacity(servers);
        for (id, stream) in streams.iter().enumerate() {
            let id = ReplicaId::new(id as u32);
            let stream = stream.try_clone()?;
            let boards = Arc::clone(&boards);
            let byzantine_p = self.params.byzantine_p;
            let seed = self.rng.r#gen::<u64>();
            let role = plan.role(id);
            supervisors.push(thread::spawn(move || match role {
                ReplicaRole::Crashed => crash_replica(stream, id, &boards),
                ReplicaRole::ByzantineEligible => {
                    cycle_replica(stream, id, true, byzantine_p, &boards, seed);
                }
                ReplicaRole::Honest => {
                    cycle_replica(stream, id, false, byzantine_p, &boards, seed);
                }
            }));
        }

        // Every supervisory thread exits once its replica is marked done,
        // so joining them all is the global termination barrier.
        for handle in supervisors {
            let _ = handle.join();
        }

        // End of run: permanent shutdown to every still-open stream.
        for (id, stream) in streams.iter_mut().enumerate() {
            if plan.role(ReplicaId::new(id as u32)) != ReplicaRole::Crashed {
                send_frame(stream, ControlFrame::shutdown());
            }
        }
        let _ = listener_handle.join();

        let report = RunReport {
            params: self.params.clone(),
            server_states: log.histories(),
            p_agreement: boards.p_agreement(),
            first_started,
            all_started,
        };
        let path = report.save(report_base, &self.run_id)?;
        info!(report = %path.display(), "run complete");
        Ok(path)
    }

    /// Accepts one control connection per replica, mapped to ids by the
    /// deployment's id ↔ address scheme.
    fn accept_replicas(&self, listener: &TcpListener) -> Result<Vec<TcpStream>> {
        let servers = self.params.servers as usize;
        let mut streams: Vec<Option<TcpStream>> = (0..servers).map(|_| None).collect();
        let mut connected = 0;

        while connected < servers {
            let (stream, addr) = listener.accept()?;
            match self.params.replica_id_for_ip(&addr.ip().to_string()) {
                Some(id) if streams[id as usize].is_none() => {
                    info!(replica = id, %addr, "control connection established");
                    streams[id as usize] = Some(stream);
                    connected += 1;
                }
                Some(id) => {
                    warn!(replica = id, %addr, "duplicate control connection dropped");
                }
                None => {
                    warn!(%addr, "connection from unknown address dropped");
                }
            }
        }

        Ok(streams.into_iter().flatten().collect())
    }
}

// ============================================================================
// Thread Bodies
// ============================================================================

/// Consumes telemetry until every replica is marked done.
fn listener_loop(socket: &UdpSocket, boards: &RunBoards, log: &TelemetryLog) {
    if let Err(error) = socket.set_read_timeout(Some(TELEMETRY_TIMEOUT)) {
        warn!(%error, "telemetry timeout unsupported, listener exiting");
        return;
    }
    let mut buf = [0u8; 64 * 1024];

    while !boards.all_done() {
        let payload = match socket.recv_from(&mut buf) {
            Ok((len, _)) => &buf[..len],
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.kind() == std::io::ErrorKind::TimedOut =>
            {
                debug!("telemetry read timed out");
                continue;
            }
            Err(error) => {
                warn!(%error, "telemetry socket failed, listener exiting");
                break;
            }
        };

        match Telemetry::decode(payload) {
            Ok(Telemetry::Ready { id, ready }) => {
                if ready {
                    info!(replica = %id, "replica ready");
                    boards.mark_ready(id);
                }
            }
            Ok(Telemetry::Snapshot(snapshot)) => {
                debug!(replica = %snapshot.id, p = snapshot.p, "state update");
                log.append(snapshot);
                if snapshot.converged {
                    boards.mark_converged(snapshot.id, snapshot.time_generated, snapshot.p);
                }
                if snapshot.is_done {
                    info!(replica = %snapshot.id, "replica reported done");
                    boards.mark_done(snapshot.id);
                }
            }
            // Byzantine senders may legally send garbage; frames without
            // an id land here too.
            Err(error) => debug!(%error, "malformed telemetry dropped"),
        }
    }
}

/// Drives one replica's UP/DOWN (and sticky Byzantine) schedule until it
/// is marked done.
fn cycle_replica(
    mut stream: TcpStream,
    id: ReplicaId,
    byzantine_eligible: bool,
    byzantine_p: f64,
    boards: &RunBoards,
    seed: u64,
) {
    let sampler = WaitSampler::new();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut is_down = false;
    let mut is_byzantine = false;

    loop {
        let wait = sampler.wait(&mut rng, is_down);
        let mut slept = Duration::ZERO;
        while slept < wait && !boards.is_done(id) {
            thread::sleep(DONE_POLL.min(wait - slept));
            slept += DONE_POLL;
        }
        if boards.is_done(id) {
            // Ensure the replica is UP before ending the cycle, so the
            // end-of-run shutdown frame can still be acted on.
            send_frame(
                &mut stream,
                ControlFrame {
                    is_down: false,
                    is_byzantine,
                    is_done: false,
                },
            );
            break;
        }

        is_down = !is_down;
        if byzantine_eligible {
            is_byzantine = sample_byzantine(is_byzantine, byzantine_p, &mut rng);
        }
        let frame = ControlFrame {
            is_down,
            is_byzantine,
            is_done: false,
        };
        if send_frame(&mut stream, frame) {
            debug!(replica = %id, is_down, is_byzantine, "fault frame sent");
        } else {
            // Reset or broken pipe: the replica is gone for this run.
            warn!(replica = %id, "control stream failed, marking replica done");
            boards.mark_done(id);
            break;
        }
    }
}

/// Permanently crashes one replica: a single DOWN + done frame, then the
/// stream is closed.
fn crash_replica(mut stream: TcpStream, id: ReplicaId, boards: &RunBoards) {
    if !send_frame(&mut stream, ControlFrame::shutdown()) {
        warn!(replica = %id, "crash frame failed");
    }
    boards.mark_done(id);
    info!(replica = %id, "sent permanent crash");
}

/// Writes one control frame; false on any encode or transport failure.
fn send_frame(stream: &mut TcpStream, frame: ControlFrame) -> bool {
    match frame.encode() {
        Ok(payload) => stream.write_all(&payload).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use attune_types::Algorithm;

    fn params(algorithm: Algorithm, servers: u32, f: u32) -> Params {
        Params {
            servers,
            f,
            eps: 0.01,
            k: 1.0,
            algorithm,
            byzantine_p: 0.2,
            broadcast_period: 50,
            controller_ip: "127.0.0.1".to_string(),
            controller_port: 0,
            replica_ips: (0..servers).map(|i| format!("10.0.0.{}", i + 3)).collect(),
            replica_port: 9_091,
            logging_server_ip: None,
            terminate_on_p_agreement: false,
            seed: Some(7),
        }
    }

    #[test]
    fn infeasible_ben_or_config_is_rejected() {
        let result = Controller::new(params(Algorithm::BenOr, 3, 1), "run".to_string());
        assert!(matches!(result, Err(ControllerError::Infeasible(_))));
    }

    #[test]
    fn infeasible_jacm86_config_is_rejected() {
        let result = Controller::new(params(Algorithm::Jacm86, 5, 1), "run".to_string());
        assert!(matches!(result, Err(ControllerError::Infeasible(_))));
    }

    #[test]
    fn feasible_configs_construct() {
        assert!(Controller::new(params(Algorithm::BenOr, 4, 1), "run".to_string()).is_ok());
        assert!(Controller::new(params(Algorithm::Jacm86, 6, 1), "run".to_string()).is_ok());
    }
}
