// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Failure classification
//!
//! Maps a failed, non-timed-out execution to an [`ErrorCategory`] by running
//! an ordered list of [`FailureMatcher`]s over its exit status and stderr.
//! The first matcher that fires decides; nothing firing means `runtime`.
//!
//! Matchers are kept sorted by the precedence of the category they yield
//! (`permission`, then `dependency`, then `syntax`, then `runtime`), so a
//! runtime registered later cannot shadow an earlier, more specific
//! category. Within one category, registration order is preserved.

use regex::{RegexSet, RegexSetBuilder};
use std::sync::Arc;
use tracing::error;

use crate::domain::execution::ErrorCategory;

/// What a matcher gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct FailureSignal<'a> {
    pub exit_code: Option<i32>,
    pub stderr: &'a str,
    /// The OS refused to start the target at all.
    pub spawn_denied: bool,
}

pub trait FailureMatcher: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> ErrorCategory;
    fn matches(&self, signal: &FailureSignal<'_>) -> bool;
}

fn precedence(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::Permission => 0,
        ErrorCategory::Dependency => 1,
        ErrorCategory::Syntax => 2,
        ErrorCategory::Runtime => 3,
        ErrorCategory::Timeout | ErrorCategory::None => 4,
    }
}

/// Case-insensitive stderr signatures plus optional exit codes.
pub struct SignatureMatcher {
    name: String,
    category: ErrorCategory,
    signatures: RegexSet,
    exit_codes: Vec<i32>,
    on_spawn_denied: bool,
}

impl SignatureMatcher {
    pub fn new(
        name: impl Into<String>,
        category: ErrorCategory,
        signatures: &[&str],
    ) -> Result<Self, regex::Error> {
        let signatures = RegexSetBuilder::new(signatures)
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            name: name.into(),
            category,
            signatures,
            exit_codes: Vec::new(),
            on_spawn_denied: false,
        })
    }

    pub fn with_exit_codes(mut self, codes: &[i32]) -> Self {
        self.exit_codes.extend_from_slice(codes);
        self
    }

    pub fn on_spawn_denied(mut self) -> Self {
        self.on_spawn_denied = true;
        self
    }
}

impl FailureMatcher for SignatureMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> ErrorCategory {
        self.category
    }

    fn matches(&self, signal: &FailureSignal<'_>) -> bool {
        (self.on_spawn_denied && signal.spawn_denied)
            || signal.exit_code.is_some_and(|code| self.exit_codes.contains(&code))
            || self.signatures.is_match(signal.stderr)
    }
}

#[derive(Clone)]
pub struct ErrorClassifier {
    matchers: Vec<Arc<dyn FailureMatcher>>,
}

impl ErrorClassifier {
    pub fn empty() -> Self {
        Self { matchers: Vec::new() }
    }

    /// Classifier preloaded with Python, Node and POSIX shell signatures.
    pub fn with_defaults() -> Self {
        let mut classifier = Self::empty();
        match builtin_matchers() {
            Ok(matchers) => {
                for matcher in matchers {
                    classifier.register(matcher);
                }
            }
            Err(e) => error!("Built-in failure signatures failed to compile: {}", e),
        }
        classifier
    }

    /// Adds a matcher after every matcher of equal or higher precedence.
    pub fn register(&mut self, matcher: impl FailureMatcher + 'static) {
        let rank = precedence(matcher.category());
        let position = self
            .matchers
            .iter()
            .position(|existing| precedence(existing.category()) > rank)
            .unwrap_or(self.matchers.len());
        self.matchers.insert(position, Arc::new(matcher));
    }

    pub fn classify(&self, signal: &FailureSignal<'_>) -> ErrorCategory {
        self.matchers
            .iter()
            .find(|matcher| matcher.matches(signal))
            .map(|matcher| matcher.category())
            .unwrap_or(ErrorCategory::Runtime)
    }

    pub fn matcher_names(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("matchers", &self.matcher_names())
            .finish()
    }
}

fn builtin_matchers() -> Result<Vec<SignatureMatcher>, regex::Error> {
    Ok(vec![
        SignatureMatcher::new(
            "os-permission",
            ErrorCategory::Permission,
            &[
                r"permission denied",
                r"operation not permitted",
                r"\bEACCES\b",
                r"\bEPERM\b",
            ],
        )?
        .with_exit_codes(&[126])
        .on_spawn_denied(),
        SignatureMatcher::new(
            "python-import",
            ErrorCategory::Dependency,
            &[
                r"ModuleNotFoundError",
                r"\bImportError\b",
                r"No module named",
            ],
        )?,
        SignatureMatcher::new(
            "node-module-resolution",
            ErrorCategory::Dependency,
            &[r"Cannot find module", r"ERR_MODULE_NOT_FOUND"],
        )?,
        SignatureMatcher::new(
            "shell-command-lookup",
            ErrorCategory::Dependency,
            &[r"command not found"],
        )?
        .with_exit_codes(&[127]),
        SignatureMatcher::new(
            "parse-failure",
            ErrorCategory::Syntax,
            &[
                r"\bSyntaxError\b",
                r"\bIndentationError\b",
                r"\bTabError\b",
                r"syntax error",
                r"unexpected token",
                r"parse error",
            ],
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(exit_code: i32, stderr: &str) -> FailureSignal<'_> {
        FailureSignal {
            exit_code: Some(exit_code),
            stderr,
            spawn_denied: false,
        }
    }

    #[test]
    fn test_python_import_failure_is_dependency() {
        let classifier = ErrorClassifier::with_defaults();
        let stderr = "Traceback (most recent call last):\n  File \"snippet.py\", line 1, in <module>\nModuleNotFoundError: No module named 'nonexistent_xyz'\n";
        assert_eq!(classifier.classify(&signal(1, stderr)), ErrorCategory::Dependency);
    }

    #[test]
    fn test_syntax_failure() {
        let classifier = ErrorClassifier::with_defaults();
        let stderr = "  File \"snippet.py\", line 1\n    def (:\n        ^\nSyntaxError: invalid syntax\n";
        assert_eq!(classifier.classify(&signal(1, stderr)), ErrorCategory::Syntax);
    }

    #[test]
    fn test_permission_precedes_other_signatures() {
        let classifier = ErrorClassifier::with_defaults();
        let stderr = "sh: ./tool: Permission denied\nImportError: whatever";
        assert_eq!(classifier.classify(&signal(1, stderr)), ErrorCategory::Permission);
        assert_eq!(classifier.classify(&signal(126, "")), ErrorCategory::Permission);

        let denied = FailureSignal { exit_code: None, stderr: "", spawn_denied: true };
        assert_eq!(classifier.classify(&denied), ErrorCategory::Permission);
    }

    #[test]
    fn test_unmatched_failure_is_runtime() {
        let classifier = ErrorClassifier::with_defaults();
        let stderr = "ZeroDivisionError: division by zero";
        assert_eq!(classifier.classify(&signal(1, stderr)), ErrorCategory::Runtime);
    }

    #[test]
    fn test_registration_respects_precedence() {
        let mut classifier = ErrorClassifier::empty();
        classifier.register(
            SignatureMatcher::new("ruby-syntax", ErrorCategory::Syntax, &[r"unexpected end-of-input"])
                .unwrap(),
        );
        classifier.register(
            SignatureMatcher::new("ruby-load", ErrorCategory::Dependency, &[r"cannot load such file"])
                .unwrap(),
        );
        classifier.register(
            SignatureMatcher::new("catch-all", ErrorCategory::Runtime, &[r"."]).unwrap(),
        );

        assert_eq!(classifier.matcher_names(), vec!["ruby-load", "ruby-syntax", "catch-all"]);

        let stderr = "cannot load such file -- foo\nunexpected end-of-input";
        assert_eq!(classifier.classify(&signal(1, stderr)), ErrorCategory::Dependency);
    }
}
