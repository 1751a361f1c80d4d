// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution requests and raw execution outcomes.
//!
//! An [`ExecutionRequest`] is what the pipeline accepts from upstream; an
//! [`ExecutionResult`] is what the runtime hands back for a single attempt.
//! Both are plain data. Failures of the executed code are encoded in
//! [`ErrorCategory`] rather than raised.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Context key that carries the language hint.
pub const LANGUAGE_CONTEXT_KEY: &str = "language";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    Shell,
    Javascript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Shell => "shell",
            Language::Javascript => "javascript",
        }
    }

    /// Prefix of a whole-line comment in this language.
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Language::Python | Language::Shell => "#",
            Language::Javascript => "//",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported language '{0}' (expected python, shell or javascript)")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "shell" | "sh" | "bash" => Ok(Language::Shell),
            "javascript" | "js" | "node" => Ok(Language::Javascript),
            other => Err(UnsupportedLanguage(other.to_string())),
        }
    }
}

/// A snippet submitted for execution. Immutable once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default)]
    pub language: Language,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Arbitrary caller parameters. Part of the fingerprint.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, timeout: Duration) -> Self {
        Self {
            code: code.into(),
            language: Language::default(),
            timeout,
            working_directory: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Adds a context parameter. A recognised `language` hint selects the
    /// runtime instead of being stored as an opaque parameter.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == LANGUAGE_CONTEXT_KEY {
            if let Ok(language) = value.parse::<Language>() {
                self.language = language;
                return self;
            }
        }
        self.context.insert(key, value);
        self
    }
}

/// Failure kind of a single execution attempt.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    #[default]
    None,
    Timeout,
    Permission,
    Dependency,
    Syntax,
    Runtime,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::None => "none",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output captured from a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

/// Raw outcome of one execution attempt. Never mutated after creation.
///
/// `success` holds exactly when `error_category` is [`ErrorCategory::None`]
/// and the attempt was not cancelled. The constructors below keep that
/// relation intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    #[serde(with = "humantime_serde")]
    pub execution_time: Duration,
    pub error_category: ErrorCategory,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub output_truncated: bool,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn succeeded(
        output: CapturedOutput,
        started_at: DateTime<Utc>,
        execution_time: Duration,
    ) -> Self {
        Self {
            success: true,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: Some(0),
            execution_time,
            error_category: ErrorCategory::None,
            cancelled: false,
            output_truncated: output.truncated,
            started_at,
        }
    }

    pub fn failed(
        error_category: ErrorCategory,
        exit_code: Option<i32>,
        output: CapturedOutput,
        started_at: DateTime<Utc>,
        execution_time: Duration,
    ) -> Self {
        Self {
            success: false,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
            execution_time,
            error_category,
            cancelled: false,
            output_truncated: output.truncated,
            started_at,
        }
    }

    pub fn timed_out(
        output: CapturedOutput,
        started_at: DateTime<Utc>,
        execution_time: Duration,
    ) -> Self {
        Self::failed(ErrorCategory::Timeout, None, output, started_at, execution_time)
    }

    /// Stopped on request before completing. Carries no error category: the
    /// code itself did not fail.
    pub fn cancelled(
        output: CapturedOutput,
        started_at: DateTime<Utc>,
        execution_time: Duration,
    ) -> Self {
        Self {
            cancelled: true,
            ..Self::failed(ErrorCategory::None, None, output, started_at, execution_time)
        }
    }

    /// Instant the attempt finished.
    pub fn completed_at(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.execution_time)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.started_at + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_hint_selects_runtime() {
        let request = ExecutionRequest::new("echo hi", Duration::from_secs(1))
            .with_context("language", "sh")
            .with_context("task", "greet");

        assert_eq!(request.language, Language::Shell);
        assert!(!request.context.contains_key("language"));
        assert_eq!(request.context.get("task").map(String::as_str), Some("greet"));
    }

    #[test]
    fn test_unknown_language_hint_is_kept_as_context() {
        let request = ExecutionRequest::new("x", Duration::from_secs(1))
            .with_context("language", "cobol");

        assert_eq!(request.language, Language::Python);
        assert_eq!(request.context.get("language").map(String::as_str), Some("cobol"));
    }

    #[test]
    fn test_result_constructors_keep_success_consistent() {
        let now = Utc::now();
        let ok = ExecutionResult::succeeded(CapturedOutput::default(), now, Duration::from_millis(5));
        assert!(ok.success);
        assert_eq!(ok.error_category, ErrorCategory::None);

        let timeout = ExecutionResult::timed_out(CapturedOutput::default(), now, Duration::from_secs(1));
        assert!(!timeout.success);
        assert_eq!(timeout.error_category, ErrorCategory::Timeout);

        let cancelled = ExecutionResult::cancelled(CapturedOutput::default(), now, Duration::ZERO);
        assert!(!cancelled.success);
        assert!(cancelled.cancelled);
        assert_eq!(cancelled.completed_at(), now);
    }

    #[test]
    fn test_request_serializes_timeout_human_readably() {
        let request = ExecutionRequest::new("print(1)", Duration::from_secs(30));
        let yaml = serde_yaml::to_string(&request).unwrap();
        assert!(yaml.contains("timeout: 30s"));
        let back: ExecutionRequest = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, request);
    }
}
