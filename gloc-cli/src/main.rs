// SPDX-License-Identifier: AGPL-3.0-or-later
//! gloc
//!
//! Replays scripted device scenarios through the geolocation plugin.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use gloc_core::Runtime;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "gloc")]
#[command(author, version, about = "Geolocation plugin scenario simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Scenario file describing the simulated device
    #[arg(short, long, global = true)]
    scenario: Option<PathBuf>,

    /// Plugin configuration (usage descriptions, default options)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the scenario's runtime
    #[arg(short, long, global = true, value_enum)]
    runtime: Option<RuntimeArg>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum RuntimeArg {
    Android,
    Ios,
    Browser,
}

impl From<RuntimeArg> for Runtime {
    fn from(value: RuntimeArg) -> Self {
        match value {
            RuntimeArg::Android => Runtime::Android,
            RuntimeArg::Ios => Runtime::Ios,
            RuntimeArg::Browser => Runtime::Browser,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Request the current position
    #[command(alias = "get")]
    Locate {
        /// Ask for the most accurate fix
        #[arg(short = 'H', long)]
        high_accuracy: bool,

        /// Timeout in milliseconds
        #[arg(short, long, allow_negative_numbers = true)]
        timeout: Option<i64>,

        /// Accept a cached position up to this age in milliseconds
        #[arg(short, long, default_value_t = 0)]
        maximum_age: u64,

        /// Number of consecutive requests
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: u32,
    },

    /// Watch position updates
    Watch {
        /// Ask for the most accurate fixes
        #[arg(short = 'H', long)]
        high_accuracy: bool,

        /// Stop after this many updates
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Give up after this many milliseconds without an update
        #[arg(long, default_value_t = 30_000)]
        idle: u64,
    },

    /// List error codes
    Codes,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let setup = commands::Setup {
        scenario: cli.scenario,
        config: cli.config,
        runtime: cli.runtime.map(Runtime::from),
        verbose: cli.verbose,
    };

    let result = match cli.command {
        Commands::Locate { high_accuracy, timeout, maximum_age, repeat } => {
            commands::locate(&setup, high_accuracy, timeout, maximum_age, repeat).await
        }
        Commands::Watch { high_accuracy, count, idle } => {
            commands::watch(&setup, high_accuracy, count, idle).await
        }
        Commands::Codes => commands::codes(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
