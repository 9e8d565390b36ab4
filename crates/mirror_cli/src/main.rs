//! Mirror CLI
//!
//! Command-line tools for inspecting device state sync behaviour offline.
//!
//! # Commands
//!
//! - `merge` - Apply a delta patch to a state tree
//! - `replay` - Run the sync coordinator against a scripted event log

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Device state mirror tools.
#[derive(Parser)]
#[command(name = "mirror")]
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
    /// Apply a delta patch to a state tree
    Merge {
        /// JSON file holding the current tree
        tree: PathBuf,

        /// JSON file holding the patch
        patch: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Replay a scripted event log through the sync coordinator
    Replay {
        /// JSON script of fetch results per device
        script: PathBuf,

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
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Merge {
            tree,
            patch,
            format,
        } => {
            commands::merge::run(&tree, &patch, &format)?;
        }
        Commands::Replay { script, format } => {
            commands::replay::run(&script, &format)?;
        }
        Commands::Version => {
            println!("Mirror CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
