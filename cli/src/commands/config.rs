// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crucible_core::domain::config::{PipelineConfig, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path (default: ./crucible.yaml)
        #[arg(short, long, default_value = "./crucible.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = PipelineConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./crucible.yaml");
        println!("  4. ~/.crucible/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Executor:".bold());
    println!("  Max concurrency: {}", config.executor.max_concurrency);
    println!("  Queue depth: {}", config.executor.effective_queue_depth());
    println!("  Default timeout: {:?}", config.executor.default_timeout);
    println!("  Max output: {} bytes", config.executor.max_output_bytes);
    for (language, interpreter) in &config.executor.interpreters {
        println!(
            "  {} → {} {}",
            language.to_string().bold(),
            interpreter.program,
            interpreter.args.join(" ")
        );
    }
    println!();

    println!("{}", "Cache:".bold());
    println!("  Capacity: {}", config.cache.capacity);
    match config.cache.ttl {
        Some(ttl) => println!("  TTL: {:?}", ttl),
        None => println!("  TTL: {}", "(none)".dimmed()),
    }
    match &config.cache.snapshot_path {
        Some(path) => println!("  Snapshot: {}", path.display()),
        None => println!("  Snapshot: {}", "(disabled)".dimmed()),
    }
    println!();

    println!("{}", "Profiler:".bold());
    println!("  Min samples: {}", config.profiler.min_samples);
    println!("  Window: {}", config.profiler.window);
    println!("  Prediction percentile: p{}", config.profiler.prediction_percentile);
    println!();

    println!("{}", "Optimizer:".bold());
    println!("  Min occurrences: {}", config.optimizer.min_occurrences);
    println!(
        "  Slow path: mean + {}σ and ≥ {}× mean",
        config.optimizer.slow_sigma, config.optimizer.slow_ratio
    );
    println!("  Thrash hit rate: < {}", config.optimizer.thrash_hit_rate);
    println!();

    println!("{}", "Recommender:".bold());
    println!("  Min confidence: {}", config.recommender.min_confidence);
    match config.recommender.max_recommendations {
        Some(max) => println!("  Max recommendations: {}", max),
        None => println!("  Max recommendations: {}", "(unlimited)".dimmed()),
    }
    println!("  Static scan: {}", config.recommender.static_scan);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = PipelineConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            output.display()
        );
    }

    PipelineConfig::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
