//! Shared run state: ready / converged / done boards and the telemetry
//! log.
//!
//! Both structures are owned by the controller and shared across its
//! threads; there are no ambient globals. The boards sit behind a single
//! mutex and only permit set-true transitions; reads take the lock too.

use std::sync::{Mutex, PoisonError};

use attune_types::{ReplicaId, Timestamp};
use attune_wire::TelemetrySnapshot;
use serde::{Deserialize, Serialize};

// ============================================================================
// Run Boards
// ============================================================================

/// The phase-agreement event: the moment every replica had reported
/// convergence, and the phase the last report carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseAgreement {
    /// Generation time of the completing snapshot.
    pub time: Timestamp,
    /// Phase of the completing snapshot.
    pub phase: u64,
}

#[derive(Debug)]
struct BoardsInner {
    ready: Vec<bool>,
    converged: Vec<bool>,
    done: Vec<bool>,
    p_agreement: Option<PhaseAgreement>,
}

/// Per-replica ready / converged / done bits for one run.
#[derive(Debug)]
pub struct RunBoards {
    terminate_on_p_agreement: bool,
    inner: Mutex<BoardsInner>,
}

impl RunBoards {
    pub fn new(servers: usize, terminate_on_p_agreement: bool) -> Self {
        Self {
            terminate_on_p_agreement,
            inner: Mutex::new(BoardsInner {
                ready: vec![false; servers],
                converged: vec![false; servers],
                done: vec![false; servers],
                p_agreement: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a replica's ready signal.
    pub fn mark_ready(&self, id: ReplicaId) {
        let mut inner = self.lock();
        if let Some(slot) = inner.ready.get_mut(id.as_usize()) {
            *slot = true;
        }
    }

    /// Whether every replica has signalled ready.
    pub fn all_ready(&self) -> bool {
        self.lock().ready.iter().all(|&ready| ready)
    }

    /// Marks a replica globally done. Set-true-only.
    pub fn mark_done(&self, id: ReplicaId) {
        let mut inner = self.lock();
        if let Some(slot) = inner.done.get_mut(id.as_usize()) {
            *slot = true;
        }
    }

    /// Whether a replica has been marked done.
    pub fn is_done(&self, id: ReplicaId) -> bool {
        self.lock().done.get(id.as_usize()).copied().unwrap_or(false)
    }

    /// Whether every replica has been marked done.
    pub fn all_done(&self) -> bool {
        self.lock().done.iter().all(|&done| done)
    }

    /// Records a convergence report.
    ///
    /// The first snapshot that completes the board records the
    /// phase-agreement event; with `terminate_on_p_agreement` set it also
    /// marks every replica done, forcing shutdown.
    pub fn mark_converged(&self, id: ReplicaId, time: Timestamp, phase: u64) {
        let mut inner = self.lock();
        if let Some(slot) = inner.converged.get_mut(id.as_usize()) {
            *slot = true;
        }
        if inner.p_agreement.is_none() && inner.converged.iter().all(|&converged| converged) {
            inner.p_agreement = Some(PhaseAgreement { time, phase });
            if self.terminate_on_p_agreement {
                inner.done.fill(true);
            }
        }
    }

    /// The phase-agreement event, if one was recorded.
    pub fn p_agreement(&self) -> Option<PhaseAgreement> {
        self.lock().p_agreement
    }
}

// ============================================================================
// Telemetry Log
// ============================================================================

/// A telemetry snapshot with its controller-side receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// The snapshot as reported by the replica.
    #[serde(flatten)]
    pub snapshot: TelemetrySnapshot,
    /// Wall-clock time the controller received it.
    pub time_received: Timestamp,
}

/// Append-only per-replica telemetry history for post-hoc analysis.
#[derive(Debug)]
pub struct TelemetryLog {
    inner: Mutex<Vec<Vec<TelemetryRecord>>>,
}

impl TelemetryLog {
    pub fn new(servers: usize) -> Self {
        Self {
            inner: Mutex::new(vec![Vec::new(); servers]),
        }
    }

    /// Appends one snapshot, stamped with the receipt time. Snapshots
    /// from unknown replica ids are dropped.
    pub fn append(&self, snapshot: TelemetrySnapshot) {
        let record = TelemetryRecord {
            snapshot,
            time_received: Timestamp::now(),
        };
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(history) = inner.get_mut(snapshot.id.as_usize()) {
            history.push(record);
        }
    }

    /// Number of records captured for one replica.
    pub fn len(&self, id: ReplicaId) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.as_usize())
            .map_or(0, Vec::len)
    }

    /// A copy of the per-replica histories, for the run report.
    pub fn histories(&self) -> Vec<Vec<TelemetryRecord>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
