//! fimflow CLI.
//!
//! # Architecture
//!
//! - `Cli` / `Commands`: argument parsing (clap)
//! - `runner`: command implementations (settings, logging, service)
//! - `CliError`: centralized error handling with stable exit codes
//!
//! Settings are loaded from `~/.fimflow/config.ini` and `FIMFLOW_*`
//! environment variables on startup; CLI arguments override both.
//!
//! The hidden `run-stage` subcommand is the per-job child-process
//! entrypoint used by the service's process supervisor. It reads the input
//! document from stdin, runs the stage, and prints the result document as
//! its final stdout line (or the error document on stderr).

mod error;
mod runner;

use clap::{Parser, Subcommand};
use error::CliError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fimflow")]
#[command(version = fimflow::VERSION)]
#[command(about = "Flood inundation map library service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the fimflow service.
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Initialize the configuration file at ~/.fimflow/config.ini.
    Init,

    /// Internal: run one pipeline stage as a job child process.
    #[command(hide = true, name = "run-stage")]
    RunStage {
        /// Registered process name.
        process: String,
    },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Start the service in the foreground.
    Start {
        /// Listen port (default: from config).
        #[arg(long)]
        port: Option<u16>,

        /// Worker thread count (default: cores − 2).
        #[arg(long)]
        threads: Option<usize>,

        /// Data directory for the job store, logs, and caches.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Check the health of a running service.
    Status {
        /// Port the service listens on (default: from config).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Signal a running service to shut down.
    Stop,
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Service { command } => match command {
            ServiceCommands::Start {
                port,
                threads,
                data_dir,
            } => runner::run_start(port, threads, data_dir),
            ServiceCommands::Status { port } => runner::run_status(port),
            ServiceCommands::Stop => runner::run_stop(),
        },
        Commands::Init => run_init(),
        Commands::RunStage { process } => runner::run_stage(&process),
    };
    if let Err(e) = result {
        e.exit();
    }
}

fn run_init() -> Result<(), CliError> {
    let path = fimflow::config::ConfigFile::ensure_exists()
        .map_err(|e| CliError::Config(e.to_string()))?;
    println!("Configuration file: {}", path.display());
    println!();
    println!("Edit this file to customize fimflow settings.");
    println!("CLI arguments override config file values when specified.");
    Ok(())
}
