//! Attune unified CLI.
//!
//! A harness for empirically studying approximate-agreement protocols
//! under controller-driven fault injection.
//!
//! # Quick Start
//!
//! ```bash
//! # On the controller host
//! attune controller run.json
//!
//! # On each replica host
//! attune replica run.json --id 0
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
use attune_config::Params;
use attune_controller::{Controller, ControllerError};
use attune_replica::{ReplicaError, ReplicaRuntime};
use attune_types::ReplicaId;
use clap::{Parser, Subcommand};
use tracing::error;
use uuid::Uuid;

/// Process exit code for an infeasible `(algorithm, n, f)` configuration.
const EXIT_INFEASIBLE: i32 = 22;

/// Attune - approximate-agreement fault-injection harness.
#[derive(Parser)]
#[command(name = "attune")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller for one simulation run.
    Controller {
        /// Path to the JSON parameter file.
        params: PathBuf,

        /// Run identifier for the report file (defaults to a fresh UUID).
        #[arg(short, long)]
        run_id: Option<String>,

        /// Base directory run reports are written under.
        #[arg(long, default_value = ".")]
        report_base: PathBuf,
    },

    /// Run one replica.
    Replica {
        /// Path to the JSON parameter file.
        params: PathBuf,

        /// This replica's id, in `[0, n)`.
        #[arg(short, long)]
        id: u32,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Controller {
            params,
            run_id,
            report_base,
        } => run_controller(&params, run_id, &report_base),
        Commands::Replica { params, id } => run_replica(&params, id),
    }
}

fn run_controller(params_path: &Path, run_id: Option<String>, report_base: &Path) -> Result<()> {
    let params = Params::load(params_path)?;
    let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let controller = match Controller::new(params, run_id) {
        Ok(controller) => controller,
        Err(infeasible @ ControllerError::Infeasible(_)) => {
            error!(%infeasible, "refusing to start");
            std::process::exit(EXIT_INFEASIBLE);
        }
        Err(other) => return Err(other.into()),
    };

    let report = controller.run(report_base)?;
    println!("report written to {}", report.display());
    Ok(())
}

fn run_replica(params_path: &Path, id: u32) -> Result<()> {
    let params = Params::load(params_path)?;

    let runtime = match ReplicaRuntime::new(params, ReplicaId::new(id)) {
        Ok(runtime) => runtime,
        Err(infeasible @ ReplicaError::Protocol(_)) => {
            error!(%infeasible, "refusing to start");
            std::process::exit(EXIT_INFEASIBLE);
        }
        Err(other) => return Err(other.into()),
    };

    runtime.run()?;
    Ok(())
}
