//! journalq CLI
//!
//! Command-line tools for inspecting and checking journal directories.
//!
//! # Commands
//!
//! - `inspect` - Load the journal and report segments and transactions
//! - `verify` - Decode every segment without modifying anything
//! - `dump` - Print decoded records for debugging

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// journalq command-line journal tools.
#[derive(Parser)]
#[command(name = "journalq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal directory
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,

    /// JSON file with journal configuration (segment size, file naming)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the journal and show segments, live records and in-doubt
    /// transactions (runs recovery)
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check headers and record checksums of every segment (read-only)
    Verify,

    /// Print decoded records
    Dump {
        /// Only dump this segment id
        #[arg(short, long)]
        segment: Option<u64>,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("journalq CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("journalq core v{}", journalq_core::VERSION);
        return Ok(());
    }

    let dir = cli.dir.ok_or("journal directory required (--dir)")?;
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&dir, config, format)?,
        Commands::Verify => commands::verify::run(&dir, &config)?,
        Commands::Dump {
            segment,
            limit,
            format,
        } => commands::dump::run(&dir, &config, segment, limit, format)?,
        Commands::Version => {}
    }

    Ok(())
}
