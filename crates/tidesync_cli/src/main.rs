//! TideSync CLI
//!
//! Runs the sync server and inspects its transaction log.
//!
//! # Commands
//!
//! - `serve` - Run the HTTP sync server
//! - `dump-log` - Print log entries for debugging
//! - `inspect` - Display log statistics and materialized state
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TideSync server and log tools.
#[derive(Parser)]
#[command(name = "tidesync")]
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
    /// Run the HTTP sync server
    Serve {
        /// Address to listen on (overrides TIDESYNC_BIND)
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// SQLite log file; omit for an in-memory log (overrides TIDESYNC_DATABASE)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Print log entries for debugging
    DumpLog {
        /// Path to the server database
        #[arg(short, long)]
        database: PathBuf,

        /// First sync id to print
        #[arg(long, default_value = "1")]
        from: u64,

        /// Last sync id to print
        #[arg(long)]
        to: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display log statistics and materialized state
    Inspect {
        /// Path to the server database
        #[arg(short, long)]
        database: PathBuf,

        /// Recompute the materialized state from the log first
        #[arg(short, long)]
        rebuild: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve { bind, database } => {
            commands::serve::run(bind, database)?;
        }
        Commands::DumpLog {
            database,
            from,
            to,
            format,
        } => {
            commands::dump_log::run(&database, from, to, &format)?;
        }
        Commands::Inspect {
            database,
            rebuild,
            format,
        } => {
            commands::inspect::run(&database, rebuild, &format)?;
        }
        Commands::Version => {
            println!("TideSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
