//! liftsync CLI
//!
//! Command-line tools for inspecting workout snapshots and exercising the
//! sync engine against an in-memory remote store.
//!
//! # Commands
//!
//! - `inspect` - Summarize a JSON snapshot and check its invariants
//! - `simulate` - Run a full sync and a fetch-and-merge round trip

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// liftsync command-line tools.
#[derive(Parser)]
#[command(name = "liftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a snapshot and check its invariants
    Inspect {
        /// Path to the snapshot JSON file
        snapshot: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Sync a snapshot into an in-memory remote, then merge it into an empty device
    Simulate {
        /// Path to the snapshot JSON file
        snapshot: PathBuf,

        /// Latency added to every remote call, in milliseconds
        #[arg(long, default_value = "0")]
        latency_ms: u64,

        /// Deadline for every remote call, in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Entity key whose remote calls never complete (repeatable)
        #[arg(long)]
        hang: Vec<String>,

        /// Settings file recording the last successful sync
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { snapshot, format } => {
            commands::inspect::run(&snapshot, &format)?;
        }
        Commands::Simulate {
            snapshot,
            latency_ms,
            timeout_ms,
            hang,
            settings,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                latency: Duration::from_millis(latency_ms),
                timeout: Duration::from_millis(timeout_ms),
                hang,
                settings,
            };
            commands::simulate::run(&snapshot, &options, &format).await?;
        }
        Commands::Version => {
            println!("liftsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
