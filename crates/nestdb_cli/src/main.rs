//! NestDB CLI
//!
//! Command-line tools for NestDB journals.
//!
//! # Commands
//!
//! - `demo` - Run a two-level nested transaction against a journal
//! - `inspect` - Replay a journal and show its collections
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// NestDB command-line tools.
#[derive(Parser)]
#[command(name = "nestdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
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
    /// Run an outer unit with one nested unit and report the outcome
    Demo {
        /// Collection to write to
        #[arg(short, long, default_value = "docs")]
        collection: String,

        /// Roll back the outer unit instead of committing it
        #[arg(long)]
        rollback_outer: bool,

        /// Roll back the nested unit instead of committing it
        #[arg(long)]
        rollback_inner: bool,
    },

    /// Replay a journal and show collections with document counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo {
            collection,
            rollback_outer,
            rollback_inner,
        } => {
            let path = cli.path.ok_or("Journal path required for demo")?;
            let options = commands::demo::DemoOptions {
                collection,
                rollback_outer,
                rollback_inner,
            };
            commands::demo::run(&path, &options)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Version => {
            println!("NestDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("NestDB Core v{}", nestdb_core::VERSION);
        }
    }

    Ok(())
}
