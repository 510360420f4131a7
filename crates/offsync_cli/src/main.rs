//! offsync CLI
//!
//! Maintenance tools for a local offsync record log.
//!
//! # Commands
//!
//! - `inspect` - Show log size, frame count and per-state record counts
//! - `list` - List records, optionally filtered by sync state
//! - `compact` - Rewrite the log with only the live set

mod commands;

use clap::{Parser, Subcommand};
use offsync_core::SyncState;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// offsync record log tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the record log file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log statistics and sync progress
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List stored records
    List {
        /// Only records in this state (synced, pending-upload, pending-deletion)
        #[arg(short, long)]
        state: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drop superseded frames from the log
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Record log path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::List { state, format } => {
            let path = cli.path.ok_or("Record log path required for list")?;
            let state = state.map(|s| s.parse::<SyncState>()).transpose()?;
            commands::list::run(&path, state, &format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Record log path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("offsync core v{}", offsync_core::VERSION);
        }
    }

    Ok(())
}
