//! Bundlekeeper CLI - Command-line interface
//!
//! Keeps a local bundle directory in sync with a remote ZIP archive.

mod commands;
mod error;
mod progress;

use std::path::PathBuf;
use std::process;

use bundlekeeper::logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};

use commands::common::{load_config, ModeArg};
use commands::reconcile::ReconcileArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "bundlekeeper")]
#[command(version, about = "Keep a local content bundle in sync with a remote archive", long_about = None)]
struct Cli {
    /// Path to an INI configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bundles directory (overrides the configuration file)
    #[arg(long, global = true)]
    bundles_dir: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Make VERSION available, downloading it from URL when needed
    Reconcile {
        /// Version the bundle must have
        #[arg(value_name = "VERSION")]
        bundle_version: String,

        /// URL of the bundle archive
        #[arg(long)]
        url: String,

        /// How to treat an existing, older bundle
        #[arg(long, value_enum, default_value = "mandatory")]
        mode: ModeArg,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Apply a downloaded update without going to the network
    Promote,
    /// Show installed and downloaded versions
    Status,
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.config.as_ref(), cli.bundles_dir.as_ref())?;

    match cli.command {
        Commands::Reconcile {
            bundle_version,
            url,
            mode,
            no_progress,
        } => commands::reconcile::run(
            &config,
            ReconcileArgs {
                url,
                version: bundle_version,
                mode: mode.into(),
                show_progress: !no_progress,
            },
        ),
        Commands::Promote => commands::promote::run(&config),
        Commands::Status => commands::status::run(&config),
    }
}

fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new(log_level(cli.verbose));
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_file(path);
    }
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}
