// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Batch execution and reporting
//!
//! Runs every snippet (optionally several times so the profiler and the
//! pattern detectors have data), then analyzes, synthesizes recommendations
//! and exports the report.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use futures::stream::{self, StreamExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

use crucible_core::application::ExecutionPipeline;
use crucible_core::domain::config::PipelineConfig;
use crucible_core::domain::execution::{ExecutionRequest, Language};
use crucible_core::domain::export::ExportFormat;
use crucible_core::domain::result::ResultCategory;

use super::run::load_request;

#[derive(Args)]
pub struct BatchArgs {
    /// Snippets to execute
    #[arg(value_name = "FILES", required = true)]
    pub files: Vec<PathBuf>,

    /// Language for every snippet (default: inferred per file)
    #[arg(short, long)]
    pub language: Option<Language>,

    /// Timeout in seconds per snippet
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Number of passes over the file list
    #[arg(short, long, default_value = "1")]
    pub repeat: usize,

    /// Report format (json, markdown, csv, html)
    #[arg(short, long, default_value = "markdown")]
    pub format: ExportFormat,

    /// Report destination (default: stdout)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    success: usize,
    partial: usize,
    failure: usize,
    timeout: usize,
    cancelled: usize,
}

impl Tally {
    fn record(&mut self, category: ResultCategory) {
        match category {
            ResultCategory::Success => self.success += 1,
            ResultCategory::Partial => self.partial += 1,
            ResultCategory::Failure => self.failure += 1,
            ResultCategory::Timeout => self.timeout += 1,
            ResultCategory::Cancelled => self.cancelled += 1,
        }
    }

    fn total(&self) -> usize {
        self.success + self.partial + self.failure + self.timeout + self.cancelled
    }
}

pub async fn execute(args: BatchArgs, config: PipelineConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    let requests = args
        .files
        .iter()
        .map(|file| {
            load_request(
                file,
                args.language,
                args.timeout,
                None,
                config.executor.default_timeout,
            )
        })
        .collect::<Result<Vec<ExecutionRequest>>>()?;

    let concurrency = config.executor.max_concurrency;
    let pipeline = ExecutionPipeline::from_config(config).context("Failed to start pipeline")?;

    let forecast = pipeline.profiler().forecast_batch(&requests);
    info!(
        snippets = requests.len(),
        repeat = args.repeat,
        predicted_ms = forecast.total.as_millis() as u64,
        confidence = forecast.confidence,
        "Starting batch"
    );

    let mut tally = Tally::default();
    for pass in 0..args.repeat.max(1) {
        let outcomes: Vec<_> = stream::iter(requests.iter().cloned())
            .map(|request| {
                let pipeline = pipeline.clone();
                async move { pipeline.execute(request).await }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(result) => tally.record(result.category),
                Err(e) => warn!(pass, error = %e, "Execution could not be completed"),
            }
        }
    }

    let optimizations = pipeline.optimize();
    let patterns = pipeline.patterns();
    let recommendations = pipeline.recommend_all();

    let metadata = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create report {:?}", path))?;
            let mut sink = BufWriter::new(file);
            let metadata = pipeline.export(args.format, &mut sink)?;
            sink.flush()?;
            metadata
        }
        None => {
            let stdout = std::io::stdout();
            let mut sink = stdout.lock();
            let metadata = pipeline.export(args.format, &mut sink)?;
            sink.flush()?;
            metadata
        }
    };
    pipeline.shutdown().context("Failed to flush cache snapshot")?;

    let statistics = pipeline.cache().statistics();
    eprintln!();
    eprintln!("{}", "Batch complete:".bold());
    eprintln!(
        "  Executions: {} ({} success, {} partial, {} failure, {} timeout)",
        tally.total(),
        tally.success.to_string().green(),
        tally.partial.to_string().yellow(),
        tally.failure.to_string().red(),
        tally.timeout.to_string().red(),
    );
    eprintln!(
        "  Cache: {} entries, {:.0}% hit rate",
        statistics.total_entries,
        statistics.hit_rate() * 100.0
    );
    eprintln!(
        "  Patterns: {}, optimizations: {}, recommendations: {}",
        patterns.len(),
        optimizations.len(),
        recommendations.len()
    );
    if let Some(path) = &args.output {
        eprintln!(
            "{}",
            format!(
                "✓ {} report written to {} ({} records)",
                metadata.format,
                path.display(),
                metadata.record_count
            )
            .green()
        );
    }

    Ok(())
}
