//! tms-adapter - Test management adapter
//!
//! Reports test framework events to a test management service.
//!
//! ## Features
//!
//! - Step and fixture trees built from start/stop events, including events
//!   emitted from helper threads
//! - Parametrized identifiers and titles resolved per test invocation
//! - Realtime or bulk delivery with bounded work-item link retries
//! - Coordination of several workers reporting into one test run
//!
//! ## Usage
//!
//! ```bash
//! # Replay a recorded event stream
//! tms-adapter replay --events events.jsonl
//!
//! # Batch results and create a new run
//! tms-adapter replay --events events.jsonl --bulk --mode new-run
//!
//! # Run the coordination service
//! tms-adapter sync-storage --port 49152
//!
//! # Check configuration
//! tms-adapter config validate
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

mod cli;

use cli::Args;
use tms_adapter::api::HttpApiClient;
use tms_adapter::config::{self, AdapterConfig, AdapterMode, EnvConfig};
use tms_adapter::delivery::AdapterManager;
use tms_adapter::listener::Listener;
use tms_adapter::sync::{self, SyncStorageRunner};
use tms_adapter::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(LogLevel::from_verbose(args.verbose));

    match args.command {
        cli::Command::Replay(replay_args) => {
            replay(replay_args, args.config.as_deref()).await?;
        }
        cli::Command::SyncStorage(sync_args) => {
            sync::serve(sync_args.port)
                .await
                .context("Coordination service failed")?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, args.config.as_deref())?;
        }
    }

    Ok(())
}

/// File values (explicit path, environment path or standard locations)
/// overridden by environment variables
fn load_config(path: Option<&Path>) -> Result<AdapterConfig> {
    let env = EnvConfig::load();
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    let config = match path {
        Some(path) => AdapterConfig::load(&path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => config::load_default()?,
    };
    Ok(config.with_env(&env))
}

async fn replay(args: cli::ReplayArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(run_id) = args.test_run_id {
        config.test_run_id = Some(run_id);
    }
    if let Some(mode) = &args.mode {
        config.adapter_mode = AdapterMode::from_str(mode)
            .ok_or_else(|| anyhow::anyhow!("Unknown adapter mode: {mode}"))?;
    }
    if args.bulk {
        config.import_realtime = false;
    }
    if args.sync_storage {
        config.sync_storage.enabled = true;
    }
    config.validate().context("Invalid configuration")?;

    let api = Arc::new(HttpApiClient::new(&config).context("Failed to create API client")?);
    let mut manager = AdapterManager::new(config.clone(), api);
    let filter = manager
        .prepare_run()
        .await
        .context("Failed to prepare test run")?;

    let mut runner = None;
    if config.sync_storage.enabled {
        if let Some(run_id) = manager.test_run_id() {
            let sync = Arc::new(SyncStorageRunner::new(run_id, config.sync_storage.clone()));
            if sync.start().await {
                runner = Some(sync);
            }
        }
    }
    if let Some(sync) = &runner {
        manager = manager.with_sync(sync.clone());
    }

    info!(
        "Replaying {} ({:?} mode, {})",
        args.events,
        config.adapter_mode,
        if config.import_realtime { "realtime" } else { "bulk" }
    );

    let reader: Box<dyn BufRead> = if args.events == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = File::open(&args.events)
            .with_context(|| format!("Failed to open event file: {}", args.events))?;
        Box::new(BufReader::new(file))
    };

    let mut listener = Listener::new(manager, config.max_step_depth).with_filter(filter);
    let summary = listener.replay(reader).await;

    if let Some(sync) = &runner {
        sync.shutdown().await;
    }

    let summary = summary.context("Replay aborted")?;
    if summary.failed_delivery > 0 {
        warn!("{} test results were not delivered", summary.failed_delivery);
    }
    println!("{summary}");
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.action {
        cli::ConfigAction::Validate => {
            let config = load_config(config_path)?;
            match config.validate() {
                Ok(()) => println!("✓ Configuration is valid"),
                Err(e) => {
                    println!("✗ Configuration is invalid");
                    println!("  Error: {e}");
                    return Err(e.into());
                }
            }
        }

        cli::ConfigAction::Example {
            output,
            format,
            force,
        } => {
            let config = AdapterConfig::example();
            match output {
                Some(output) => {
                    let path = Path::new(&output);
                    if path.exists() && !force {
                        anyhow::bail!(
                            "Configuration file already exists: {output}. Use --force to overwrite."
                        );
                    }
                    config.save(path)?;
                    println!("✓ Configuration file created: {output}");
                }
                None => println!("{}", render(&config, &format)?),
            }
        }

        cli::ConfigAction::Show { format } => {
            let mut config = load_config(config_path)?;
            if !config.private_token.is_empty() {
                config.private_token = "***".to_string();
            }
            println!("{}", render(&config, &format)?);
        }

        cli::ConfigAction::Env => config::print_env_help(),
    }

    Ok(())
}

fn render(config: &AdapterConfig, format: &str) -> Result<String> {
    Ok(if format == "json" {
        serde_json::to_string_pretty(config)?
    } else {
        serde_yaml::to_string(config)?
    })
}
