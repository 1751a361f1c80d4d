// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Single snippet execution

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crucible_core::application::ExecutionPipeline;
use crucible_core::domain::config::PipelineConfig;
use crucible_core::domain::execution::{ExecutionRequest, Language};
use crucible_core::domain::result::{EnhancedResult, ResultCategory};

#[derive(Args)]
pub struct RunArgs {
    /// Snippet to execute
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Language of the snippet (default: inferred from the file extension)
    #[arg(short, long)]
    pub language: Option<Language>,

    /// Timeout in seconds (default: executor.default_timeout)
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Working directory for the child process
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Print the enhanced result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: RunArgs, config: PipelineConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    let request = load_request(
        &args.file,
        args.language,
        args.timeout,
        args.cwd.clone(),
        config.executor.default_timeout,
    )?;

    let pipeline = ExecutionPipeline::from_config(config).context("Failed to start pipeline")?;
    let prediction = pipeline
        .profiler()
        .predict_for_code(&request.code, request.language);
    debug!(
        predicted_ms = prediction.predicted.as_millis() as u64,
        confidence = prediction.confidence,
        "Predicted execution time"
    );

    let result = pipeline.execute(request).await;
    pipeline.shutdown().context("Failed to flush cache snapshot")?;
    let result = result.context("Execution failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if matches!(result.category, ResultCategory::Failure | ResultCategory::Timeout) {
        std::process::exit(1);
    }
    Ok(())
}

/// Reads `file` into a request. The language falls back to the file
/// extension when not given explicitly.
pub fn load_request(
    file: &Path,
    language: Option<Language>,
    timeout_secs: Option<f64>,
    cwd: Option<PathBuf>,
    default_timeout: Duration,
) -> Result<ExecutionRequest> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read snippet {:?}", file))?;
    let language = match language {
        Some(language) => language,
        None => infer_language(file)
            .with_context(|| format!("Cannot infer language of {:?}; pass --language", file))?,
    };
    let timeout = match timeout_secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
        Some(secs) => bail!("Timeout must be a positive number of seconds, got {}", secs),
        None => default_timeout,
    };

    let mut request = ExecutionRequest::new(code, timeout).with_language(language);
    if let Some(dir) = cwd {
        request = request.with_working_directory(dir);
    }
    Ok(request)
}

pub fn infer_language(file: &Path) -> Option<Language> {
    let extension = file.extension()?.to_str()?;
    match extension.to_ascii_lowercase().as_str() {
        "py" => Some(Language::Python),
        "sh" | "bash" => Some(Language::Shell),
        "js" | "mjs" | "cjs" => Some(Language::Javascript),
        _ => None,
    }
}

fn print_result(result: &EnhancedResult) {
    let category = match result.category {
        ResultCategory::Success => result.category.to_string().green(),
        ResultCategory::Partial => result.category.to_string().yellow(),
        _ => result.category.to_string().red(),
    };
    println!("{} {}", category.bold(), result.fingerprint.short().dimmed());
    println!("  {}", result.summary);
    if !result.raw.stdout.is_empty() {
        println!();
        println!("{}", "stdout:".bold());
        print!("{}", result.raw.stdout);
        if !result.raw.stdout.ends_with('\n') {
            println!();
        }
    }
    if !result.raw.stderr.is_empty() {
        println!();
        println!("{}", "stderr:".bold());
        print!("{}", result.raw.stderr.dimmed());
        if !result.raw.stderr.ends_with('\n') {
            println!();
        }
    }
    if result.raw.output_truncated {
        println!("{}", "(output truncated)".yellow());
    }
}
