// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Static complexity classification and duration profiles.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::domain::execution::Language;
use crate::domain::result::Fingerprint;

static BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    // `? x :` ternaries need whitespace after `?`, which skips `?.` and `??`
    Regex::new(r"\b(if|elif|case|except|catch|when)\b|&&|\|\||\?\s[^?:]*:")
        .unwrap_or_else(|e| unreachable!("branch pattern is valid: {e}"))
});

static LOOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(async\s+)?(for|while|until|do)\b")
        .unwrap_or_else(|e| unreachable!("loop pattern is valid: {e}"))
});

/// Execution-independent structural complexity of a snippet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl ComplexityLevel {
    pub const ALL: [ComplexityLevel; 5] = [
        ComplexityLevel::Trivial,
        ComplexityLevel::Simple,
        ComplexityLevel::Moderate,
        ComplexityLevel::Complex,
        ComplexityLevel::Expert,
    ];

    pub fn from_score(score: usize) -> Self {
        match score {
            0..=5 => ComplexityLevel::Trivial,
            6..=25 => ComplexityLevel::Simple,
            26..=80 => ComplexityLevel::Moderate,
            81..=200 => ComplexityLevel::Complex,
            _ => ComplexityLevel::Expert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Trivial => "trivial",
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Moderate => "moderate",
            ComplexityLevel::Complex => "complex",
            ComplexityLevel::Expert => "expert",
        }
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape metrics of a snippet: significant lines, branch points and the
/// deepest loop nesting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeShape {
    pub lines: usize,
    pub branches: usize,
    pub max_loop_depth: usize,
}

impl CodeShape {
    pub fn measure(code: &str, language: Language) -> Self {
        let prefix = language.comment_prefix();
        let mut shape = CodeShape::default();

        // Indentation of each open loop header (python, shell).
        let mut open_by_indent: Vec<usize> = Vec::new();
        // Brace depth at which each open loop started (javascript).
        let mut open_by_brace: Vec<i64> = Vec::new();
        let mut brace_depth: i64 = 0;

        for raw in code.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(prefix) {
                continue;
            }
            shape.lines += 1;
            shape.branches += BRANCH.find_iter(line).count();
            let starts_loop = LOOP.is_match(line);

            match language {
                Language::Python | Language::Shell => {
                    let indent = raw.len() - raw.trim_start().len();
                    while open_by_indent.last().is_some_and(|&top| indent <= top) {
                        open_by_indent.pop();
                    }
                    if starts_loop {
                        open_by_indent.push(indent);
                        shape.max_loop_depth = shape.max_loop_depth.max(open_by_indent.len());
                    }
                }
                Language::Javascript => {
                    if starts_loop {
                        open_by_brace.push(brace_depth);
                        shape.max_loop_depth = shape.max_loop_depth.max(open_by_brace.len());
                    }
                    let opens = line.matches('{').count() as i64;
                    let closes = line.matches('}').count() as i64;
                    brace_depth += opens - closes;
                    if !(starts_loop && opens > closes) {
                        while open_by_brace.last().is_some_and(|&top| brace_depth <= top) {
                            open_by_brace.pop();
                        }
                    }
                }
            }
        }
        shape
    }

    pub fn score(&self) -> usize {
        self.lines + 2 * self.branches + 8 * self.max_loop_depth
    }

    pub fn complexity(&self) -> ComplexityLevel {
        ComplexityLevel::from_score(self.score())
    }
}

/// Accumulated duration statistics for one complexity class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    pub complexity: ComplexityLevel,
    pub sample_count: u64,
    pub mean_ms: f64,
    /// Sample variance in ms². Zero below two samples.
    pub variance_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionProfile {
    pub fn std_dev_ms(&self) -> f64 {
        self.variance_ms.max(0.0).sqrt()
    }

    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean_ms > 0.0 {
            self.std_dev_ms() / self.mean_ms
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionBasis {
    /// Not enough samples; the configured default was returned.
    Default,
    Observed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformancePrediction {
    pub complexity: Option<ComplexityLevel>,
    #[serde(with = "humantime_serde")]
    pub predicted: Duration,
    pub confidence: f64,
    pub sample_count: u64,
    pub basis: PredictionBasis,
}

impl PerformancePrediction {
    pub fn is_default(&self) -> bool {
        self.basis == PredictionBasis::Default
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("insufficient samples for {complexity} profile: have {samples}, need {required}")]
    InsufficientSamples {
        complexity: ComplexityLevel,
        samples: u64,
        required: u64,
    },

    #[error("fingerprint {0} has never been observed")]
    UnknownFingerprint(Fingerprint),
}
