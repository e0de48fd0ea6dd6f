//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Test management adapter
#[derive(Parser, Debug)]
#[command(name = "tms-adapter")]
#[command(version)]
#[command(about = "Report test framework events to a test management service")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Feed a recorded event stream through the delivery pipeline
    Replay(ReplayArgs),

    /// Run the worker coordination service
    SyncStorage(SyncStorageArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for replay command
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// JSON-lines event file, `-` for stdin
    #[arg(short, long)]
    pub events: String,

    /// Override the test run id
    #[arg(long)]
    pub test_run_id: Option<String>,

    /// Adapter mode (filtered, run-all, new-run)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Batch results instead of delivering each test when it finishes
    #[arg(long)]
    pub bulk: bool,

    /// Coordinate with other workers through the sync storage service
    #[arg(long)]
    pub sync_storage: bool,
}

/// Arguments for sync-storage command
#[derive(Parser, Debug)]
pub struct SyncStorageArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "49152")]
    pub port: u16,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the effective configuration (file + environment)
    Validate,

    /// Print or write an example configuration
    Example {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,

        /// Output format when printing (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// List supported environment variables
    Env,
}
