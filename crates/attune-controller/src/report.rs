//! Persisted run results.
//!
//! At controller exit, the full telemetry history, the parameters, and
//! the start timestamps are written as one self-describing JSON document
//! under a directory derived from the parameter set.

use std::fs;
use std::path::{Path, PathBuf};

use attune_config::Params;
use attune_types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::boards::{PhaseAgreement, TelemetryRecord};
use crate::error::Result;

/// Everything a run leaves behind.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// The parameters the run was launched with.
    pub params: Params,

    /// Per-replica telemetry histories, indexed by replica id.
    pub server_states: Vec<Vec<TelemetryRecord>>,

    /// The phase-agreement event, if every replica reported convergence.
    pub p_agreement: Option<PhaseAgreement>,

    /// Wall-clock time just before the first start frame was sent.
    pub first_started: Timestamp,

    /// Wall-clock time just after the last start frame was sent.
    pub all_started: Timestamp,
}

impl RunReport {
    /// Writes the report as
    /// `<base>/<parameter-derived directory>/<run_id>.json`, creating
    /// directories as needed. Returns the path written.
    pub fn save(&self, base: &Path, run_id: &str) -> Result<PathBuf> {
        let dir = base.join(self.params.report_dir());
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{run_id}.json"));
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}
