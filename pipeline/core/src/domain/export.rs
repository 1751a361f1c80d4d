// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Export formats, metadata and the entity bundle written by the exporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::optimization::{OptimizationRecommendation, PatternAnalysis};
use crate::domain::profile::ExecutionProfile;
use crate::domain::recommendation::CodeRecommendation;
use crate::domain::result::EnhancedResult;

pub const EXPORTER_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
    Html,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "csv" => Ok(ExportFormat::Csv),
            "html" | "htm" => Ok(ExportFormat::Html),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub export_id: Uuid,
    pub format: ExportFormat,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
    pub exporter_version: String,
}

/// Everything an export can carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    #[serde(default)]
    pub results: Vec<EnhancedResult>,
    #[serde(default)]
    pub profiles: Vec<ExecutionProfile>,
    #[serde(default)]
    pub patterns: Vec<PatternAnalysis>,
    #[serde(default)]
    pub optimizations: Vec<OptimizationRecommendation>,
    #[serde(default)]
    pub recommendations: Vec<CodeRecommendation>,
}

impl ExportBundle {
    pub fn len(&self) -> usize {
        self.results.len()
            + self.profiles.len()
            + self.patterns.len()
            + self.optimizations.len()
            + self.recommendations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported export format '{0}' (expected json, markdown, csv or html)")]
    UnsupportedFormat(String),

    #[error("export sink failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("export artifact is not valid UTF-8")]
    Encoding,
}
