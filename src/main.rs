//! Falcon server entry point: parses the run configuration, wires up
//! logging, and hands control to the Graph Manager's control socket loop.
//! The graph itself is built later over that socket (`graph build`); this
//! binary only brings up the process the socket answers on.

use std::process::ExitCode;

use clap::Parser;
use falcon::{GlobalContext, GraphManager};
use tracing_subscriber::EnvFilter;

/// Command-line configuration for the Falcon processing server.
#[derive(Parser, Debug)]
#[command(name = "falcon-server", about = "Low-latency neural-signal processing server")]
struct Args {
    /// Address the control socket listens on.
    #[arg(long, default_value = "127.0.0.1:7777")]
    bind: String,

    /// Root directory under which per-run output subdirectories are created.
    #[arg(long, default_value = "./run")]
    run_root: String,

    /// Root directory for read-only resources (filter coefficients, etc).
    #[arg(long, default_value = "./resources")]
    resource_root: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    if let Err(err) = falcon::constants::validate_constants() {
        tracing::error!(%err, "invalid build-time constants");
        return ExitCode::FAILURE;
    }

    if let Err(err) = std::fs::create_dir_all(&args.run_root) {
        tracing::error!(run_root = %args.run_root, %err, "failed to create run root");
        return ExitCode::FAILURE;
    }

    let global = GlobalContext::new(args.run_root.clone(), args.resource_root.clone());
    let mut manager = GraphManager::new(global);

    match manager.run(&args.bind) {
        Ok(()) => {
            tracing::info!("graph manager shut down normally");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "graph manager exited with an error");
            ExitCode::FAILURE
        }
    }
}
