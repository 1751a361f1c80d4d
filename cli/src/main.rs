// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Crucible CLI
//!
//! The `crucible` binary runs code snippets through the execution pipeline.
//!
//! ## Commands
//!
//! - `crucible run <FILE>` - Execute one snippet and print the result
//! - `crucible batch <FILES>...` - Execute snippets, analyze them and export a report
//! - `crucible config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use crucible_cli::commands::{self, BatchArgs, ConfigCommand, RunArgs};
use crucible_core::domain::config::{LogFormat, PipelineConfig};

/// Crucible - execute, cache and profile code snippets
#[derive(Parser)]
#[command(name = "crucible")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CRUCIBLE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "CRUCIBLE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single snippet
    #[command(name = "run")]
    Run(RunArgs),

    /// Execute snippets and export a report
    #[command(name = "batch")]
    Batch(BatchArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Loaded before logging so the configured level and format apply. A bad
    // file only fails the commands that need it.
    let config = PipelineConfig::load_or_default(cli.config.clone());
    let (level, format) = match &config {
        Ok(config) => (
            cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone()),
            config.logging.format,
        ),
        Err(_) => (
            cli.log_level.clone().unwrap_or_else(|| "info".to_string()),
            LogFormat::Text,
        ),
    };
    init_logging(&level, format)?;

    match cli.command {
        Some(Commands::Run(args)) => commands::run::execute(args, config?).await,
        Some(Commands::Batch(args)) => commands::batch::execute(args, config?).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
