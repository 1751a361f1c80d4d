// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Enhanced results: a raw execution outcome tagged with its fingerprint,
//! code family and category.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::execution::{ErrorCategory, ExecutionResult, Language};
use crate::domain::profile::ComplexityLevel;

/// Hex SHA-256 identifying a normalized (code, context) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs and reports.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Similarity key shared by snippets that differ only in identifiers and
/// literal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeFamily(String);

impl CodeFamily {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultCategory {
    Success,
    Partial,
    Failure,
    Timeout,
    Cancelled,
}

impl ResultCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCategory::Success => "success",
            ResultCategory::Partial => "partial",
            ResultCategory::Failure => "failure",
            ResultCategory::Timeout => "timeout",
            ResultCategory::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ResultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub language: Language,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    pub stdout_lines: usize,
    pub has_stderr: bool,
    pub exit_code: Option<i32>,
    pub output_truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedResult {
    pub fingerprint: Fingerprint,
    pub family: CodeFamily,
    pub category: ResultCategory,
    pub complexity: ComplexityLevel,
    /// Completion instant of the underlying attempt.
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub metadata: ResultMetadata,
    pub raw: ExecutionResult,
}

impl EnhancedResult {
    /// Cancelled attempts say nothing about the code and are never memoized.
    pub fn is_cacheable(&self) -> bool {
        self.category != ResultCategory::Cancelled
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.category, ResultCategory::Failure | ResultCategory::Timeout)
    }

    pub fn error_category(&self) -> ErrorCategory {
        self.raw.error_category
    }

    pub fn duration(&self) -> Duration {
        self.raw.execution_time
    }

    pub fn duration_ms(&self) -> f64 {
        self.raw.execution_time.as_secs_f64() * 1000.0
    }
}

/// Pipeline progress of one result. Ordered; progress only moves forward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    #[default]
    Pending,
    Cached,
    Profiled,
    Analyzed,
    Recommended,
    Exported,
}

impl ResultState {
    /// Returns the later of the two states.
    pub fn advance(self, to: ResultState) -> ResultState {
        self.max(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_never_regresses() {
        let state = ResultState::Pending
            .advance(ResultState::Recommended)
            .advance(ResultState::Analyzed);
        assert_eq!(state, ResultState::Recommended);
        assert_eq!(state.advance(ResultState::Exported), ResultState::Exported);
    }

    #[test]
    fn test_short_fingerprint() {
        let fp = Fingerprint::new("0123456789abcdef0123");
        assert_eq!(fp.short(), "0123456789ab");
        assert_eq!(Fingerprint::new("abc").short(), "abc");
    }
}
