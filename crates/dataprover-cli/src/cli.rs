//! CLI argument definitions for the `dataprover` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// dataprover -- scripted data providers for Cardano Merkle tries.
#[derive(Parser)]
#[command(
    name = "dataprover",
    version,
    about = "dataprover -- run JavaScript and Python data providers",
    long_about = "Loads provider scripts from a plugins directory, keeps them reloaded as \
                  they change, and ingests their records on a schedule."
)]
pub struct Cli {
    /// Path to the runtime configuration file.
    #[arg(long, short, global = true, default_value = "dataprover.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load every provider, watch for script changes and run schedules
    /// until interrupted.
    Serve,

    /// List discovered providers and their status.
    List,

    /// Print a provider's configuration schemas as JSON.
    Schema {
        /// Provider name.
        provider: String,
    },

    /// Run one ingestion for a provider and print the report.
    Trigger {
        /// Provider name.
        provider: String,

        /// Target identifier. Defaults to the provider's schedule template.
        #[arg(long, short)]
        target: Option<String>,
    },

    /// Check a single provider directory without registering it.
    Check {
        /// Directory containing `manifest.json` and the script.
        dir: PathBuf,
    },
}
