// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Result Processor
//!
//! Turns a raw [`ExecutionResult`] plus the request that produced it into an
//! [`EnhancedResult`]. Processing is a pure function of its inputs: no clock
//! reads, no shared state, so equal inputs give structurally equal outputs.
//!
//! Fingerprints cover the normalized code, the language and the context map.
//! Normalization removes line-ending, trailing-whitespace, blank-line and
//! whole-line-comment differences outside string literals; indentation is
//! kept because it is significant in Python. Timeout and working directory are not part of the
//! fingerprint.

use sha2::{Digest, Sha256};

use crate::domain::config::ProcessorConfig;
use crate::domain::execution::{ErrorCategory, ExecutionRequest, ExecutionResult, Language};
use crate::domain::profile::CodeShape;
use crate::domain::result::{
    CodeFamily, EnhancedResult, Fingerprint, ResultCategory, ResultMetadata,
};

const FAMILY_KEY_LEN: usize = 16;

const KEYWORDS: &[&str] = &[
    // python
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del",
    "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in",
    "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield", "None", "True", "False",
    // javascript
    "const", "let", "var", "function", "new", "this", "typeof", "instanceof", "switch",
    "case", "default", "catch", "throw", "of", "null", "undefined", "true", "false",
    "require", "export",
    // shell
    "then", "fi", "do", "done", "esac", "until", "echo", "local",
];

#[derive(Debug, Clone)]
pub struct ResultProcessor {
    warning_signatures: Vec<String>,
}

impl ResultProcessor {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            warning_signatures: config
                .warning_signatures
                .iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn process(&self, raw: &ExecutionResult, request: &ExecutionRequest) -> EnhancedResult {
        let normalized = normalize(&request.code, request.language);
        let category = self.categorize(raw);
        let metadata = ResultMetadata {
            language: request.language,
            stdout_bytes: raw.stdout.len(),
            stderr_bytes: raw.stderr.len(),
            stdout_lines: raw.stdout.lines().count(),
            has_stderr: !raw.stderr.trim().is_empty(),
            exit_code: raw.exit_code,
            output_truncated: raw.output_truncated,
        };

        EnhancedResult {
            fingerprint: fingerprint_normalized(&normalized, request),
            family: family_normalized(&normalized, request.language),
            category,
            complexity: CodeShape::measure(&request.code, request.language).complexity(),
            created_at: raw.completed_at(),
            summary: summarize(raw, category, request.language),
            metadata,
            raw: raw.clone(),
        }
    }

    pub fn process_batch<'a, I>(&self, items: I) -> Vec<EnhancedResult>
    where
        I: IntoIterator<Item = (&'a ExecutionResult, &'a ExecutionRequest)>,
    {
        items
            .into_iter()
            .map(|(raw, request)| self.process(raw, request))
            .collect()
    }

    /// First match wins: cancelled, timeout, success with warnings, success,
    /// failure.
    pub fn categorize(&self, raw: &ExecutionResult) -> ResultCategory {
        if raw.cancelled {
            ResultCategory::Cancelled
        } else if raw.error_category == ErrorCategory::Timeout {
            ResultCategory::Timeout
        } else if raw.success && self.has_warning(&raw.stderr) {
            ResultCategory::Partial
        } else if raw.success {
            ResultCategory::Success
        } else {
            ResultCategory::Failure
        }
    }

    pub fn fingerprint(&self, request: &ExecutionRequest) -> Fingerprint {
        fingerprint_normalized(&normalize(&request.code, request.language), request)
    }

    pub fn family(&self, request: &ExecutionRequest) -> CodeFamily {
        family_normalized(&normalize(&request.code, request.language), request.language)
    }

    fn has_warning(&self, stderr: &str) -> bool {
        if stderr.is_empty() {
            return false;
        }
        let stderr = stderr.to_lowercase();
        self.warning_signatures.iter().any(|sig| stderr.contains(sig))
    }
}

impl Default for ResultProcessor {
    fn default() -> Self {
        Self::new(&ProcessorConfig::default())
    }
}

/// Canonical form of a snippet used for fingerprinting.
///
/// Lines that start inside, or end inside, a multi-line string literal or a
/// shell heredoc are kept verbatim: their blank lines, `#` lines and trailing
/// whitespace are program data.
pub fn normalize(code: &str, language: Language) -> String {
    let prefix = language.comment_prefix();
    let mut open: Option<OpenLiteral> = None;
    let mut kept = Vec::new();
    for line in code.lines() {
        let started_inside = open.is_some();
        open = scan_line(line, language, open);
        if started_inside || open.is_some() {
            kept.push(line);
            continue;
        }
        let line = line.trim_end();
        let content = line.trim_start();
        if !content.is_empty() && !content.starts_with(prefix) {
            kept.push(line);
        }
    }
    kept.join("\n")
}

/// A literal still open at the end of a line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OpenLiteral {
    Quoted { close: &'static str, escapes: bool },
    Heredoc { tag: String },
}

/// Lexes one line starting in state `open` and returns the state at its end.
fn scan_line(line: &str, language: Language, open: Option<OpenLiteral>) -> Option<OpenLiteral> {
    let mut quote = match open {
        Some(OpenLiteral::Heredoc { tag }) => {
            return if line.trim() == tag {
                None
            } else {
                Some(OpenLiteral::Heredoc { tag })
            };
        }
        Some(OpenLiteral::Quoted { close, escapes }) => Some((close, escapes)),
        None => None,
    };

    let chars: Vec<char> = line.chars().collect();
    let mut heredoc = None;
    let mut i = 0;
    while i < chars.len() {
        if let Some((close, escapes)) = quote {
            if escapes && chars[i] == '\\' {
                i += 2;
            } else if at(&chars, i, close) {
                i += close.len();
                quote = None;
            } else {
                i += 1;
            }
            continue;
        }
        if starts_comment(&chars, i, language) {
            break;
        }
        if let Some((delimiter, escapes)) = opening_quote(&chars, i, language) {
            i += delimiter.len();
            quote = Some((delimiter, escapes));
            continue;
        }
        if language == Language::Shell && at(&chars, i, "<<") {
            if let Some((tag, consumed)) = heredoc_tag(&chars[i + 2..]) {
                heredoc = Some(tag);
                i += 2 + consumed;
                continue;
            }
        }
        i += 1;
    }

    match quote {
        Some((close, escapes)) if spans_lines(close, language) => {
            Some(OpenLiteral::Quoted { close, escapes })
        }
        // an unterminated single-line string ends with the line
        Some(_) => None,
        None => heredoc.map(|tag| OpenLiteral::Heredoc { tag }),
    }
}

fn at(chars: &[char], i: usize, pattern: &str) -> bool {
    pattern
        .chars()
        .enumerate()
        .all(|(offset, expected)| chars.get(i + offset) == Some(&expected))
}

fn starts_comment(chars: &[char], i: usize, language: Language) -> bool {
    match language {
        Language::Python => chars[i] == '#',
        Language::Javascript => at(chars, i, "//"),
        Language::Shell => chars[i] == '#' && (i == 0 || chars[i - 1].is_whitespace()),
    }
}

/// Delimiters are ASCII, so their byte length is their char length.
fn opening_quote(chars: &[char], i: usize, language: Language) -> Option<(&'static str, bool)> {
    match (language, chars[i]) {
        (Language::Python, '"') if at(chars, i, "\"\"\"") => Some(("\"\"\"", true)),
        (Language::Python, '\'') if at(chars, i, "'''") => Some(("'''", true)),
        (Language::Shell, '\'') => Some(("'", false)),
        (Language::Javascript, '`') => Some(("`", true)),
        (_, '"') => Some(("\"", true)),
        (_, '\'') => Some(("'", true)),
        _ => None,
    }
}

fn spans_lines(close: &str, language: Language) -> bool {
    match language {
        Language::Python => close.len() == 3,
        Language::Javascript => close == "`",
        Language::Shell => true,
    }
}

/// Parses the word after `<<`: `-` for tab-stripped bodies, an optionally
/// quoted tag. Returns the tag and the chars consumed.
fn heredoc_tag(rest: &[char]) -> Option<(String, usize)> {
    let mut i = 0;
    match rest.first() {
        Some('<') => return None,
        Some('-') => i += 1,
        _ => {}
    }
    while rest.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    let quote = rest.get(i).copied().filter(|c| *c == '\'' || *c == '"');
    if quote.is_some() {
        i += 1;
    }
    if !rest.get(i).is_some_and(|c| c.is_alphabetic() || *c == '_') {
        return None;
    }
    let start = i;
    while rest.get(i).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
        i += 1;
    }
    let tag: String = rest[start..i].iter().collect();
    if quote.is_some() && rest.get(i).copied() == quote {
        i += 1;
    }
    Some((tag, i))
}

fn fingerprint_normalized(normalized: &str, request: &ExecutionRequest) -> Fingerprint {
    let mut hasher = Sha256::new();
    feed(&mut hasher, request.language.as_str());
    feed(&mut hasher, normalized);
    // BTreeMap iteration is key-ordered, so this encoding is canonical.
    for (key, value) in &request.context {
        feed(&mut hasher, key);
        feed(&mut hasher, value);
    }
    Fingerprint::new(hex::encode(hasher.finalize()))
}

fn feed(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

fn family_normalized(normalized: &str, language: Language) -> CodeFamily {
    let mut hasher = Sha256::new();
    feed(&mut hasher, language.as_str());
    feed(&mut hasher, &skeleton(normalized));
    let digest = hex::encode(hasher.finalize());
    CodeFamily::new(&digest[..FAMILY_KEY_LEN])
}

/// Token skeleton: identifiers become `I`, numbers `N`, string literals `S`;
/// keywords, punctuation and line structure survive.
fn skeleton(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for line in code.lines() {
        let mut chars = line.trim_start().chars().peekable();
        let mut tokens: Vec<String> = Vec::new();
        while let Some(c) = chars.next() {
            if c.is_whitespace() {
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if KEYWORDS.contains(&word.as_str()) {
                    tokens.push(word);
                } else {
                    tokens.push("I".to_string());
                }
            } else if c.is_ascii_digit() {
                while chars
                    .peek()
                    .is_some_and(|next| next.is_ascii_alphanumeric() || *next == '.' || *next == '_')
                {
                    chars.next();
                }
                tokens.push("N".to_string());
            } else if c == '"' || c == '\'' || c == '`' {
                let mut escaped = false;
                for next in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if next == '\\' {
                        escaped = true;
                    } else if next == c {
                        break;
                    }
                }
                tokens.push("S".to_string());
            } else {
                tokens.push(c.to_string());
            }
        }
        out.push_str(&tokens.join(" "));
        out.push('\n');
    }
    out
}

fn summarize(raw: &ExecutionResult, category: ResultCategory, language: Language) -> String {
    let exit = raw
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} | exit {} | error {} | {}ms | {} bytes output | {}",
        category,
        exit,
        raw.error_category,
        raw.execution_time.as_millis(),
        raw.stdout.len() + raw.stderr.len(),
        language
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::CapturedOutput;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn started() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn ok(stdout: &str, stderr: &str) -> ExecutionResult {
        ExecutionResult::succeeded(
            CapturedOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                truncated: false,
            },
            started(),
            Duration::from_millis(42),
        )
    }

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest::new(code, Duration::from_secs(5))
    }

    #[test]
    fn test_process_is_deterministic() {
        let processor = ResultProcessor::default();
        let raw = ok("hi\n", "");
        let req = request("print(\"hi\")").with_context("task", "greet");

        let first = processor.process(&raw, &req);
        let second = processor.process(&raw, &req);
        assert_eq!(first, second);
        assert_eq!(first.fingerprint.as_str().len(), 64);
        assert_eq!(first.created_at, started() + chrono::Duration::milliseconds(42));
    }

    #[test]
    fn test_insignificant_variance_shares_fingerprint() {
        let processor = ResultProcessor::default();
        let a = request("# greet\nprint('hi')\n");
        let b = request("print('hi')   \r\n\r\n\n    # trailing comment\n");
        assert_eq!(processor.fingerprint(&a), processor.fingerprint(&b));
    }

    #[test]
    fn test_multiline_literal_content_changes_fingerprint() {
        let processor = ResultProcessor::default();

        let a = request("print(\"\"\"a\n\nb\"\"\")");
        let b = request("print(\"\"\"a\nb\"\"\")");
        assert_ne!(processor.fingerprint(&a), processor.fingerprint(&b));

        let c = request("s = '''\n# not a comment\n'''\nprint(s)");
        let d = request("s = '''\n'''\nprint(s)");
        assert_ne!(processor.fingerprint(&c), processor.fingerprint(&d));

        let e = request("s = '''x   \n'''");
        let f = request("s = '''x\n'''");
        assert_ne!(processor.fingerprint(&e), processor.fingerprint(&f));
    }

    #[test]
    fn test_code_after_a_closed_literal_is_still_normalized() {
        let processor = ResultProcessor::default();
        let a = request("doc = \"\"\"\nbody\n\"\"\"\n\n# done\nprint(doc)   ");
        let b = request("doc = \"\"\"\nbody\n\"\"\"\nprint(doc)");
        assert_eq!(processor.fingerprint(&a), processor.fingerprint(&b));
    }

    #[test]
    fn test_quote_inside_comment_does_not_open_a_literal() {
        let processor = ResultProcessor::default();
        let a = request("x = 1  # it's fine\n\nprint(x)");
        let b = request("x = 1  # it's fine\nprint(x)");
        assert_eq!(processor.fingerprint(&a), processor.fingerprint(&b));
    }

    #[test]
    fn test_shell_heredoc_and_javascript_template_bodies_are_kept() {
        let processor = ResultProcessor::default();

        let shell = |code: &str| request(code).with_language(Language::Shell);
        let a = shell("cat <<EOF\n# header\n\nEOF\necho done");
        let b = shell("cat <<EOF\nEOF\necho done");
        assert_ne!(processor.fingerprint(&a), processor.fingerprint(&b));

        let c = shell("cat <<-'END'\nbody\nEND\n\n# trailing\necho done");
        let d = shell("cat <<-'END'\nbody\nEND\necho done");
        assert_eq!(processor.fingerprint(&c), processor.fingerprint(&d));

        let js = |code: &str| request(code).with_language(Language::Javascript);
        let e = js("const t = `a\n\n// kept\nb`;\nconsole.log(t);");
        let f = js("const t = `a\nb`;\nconsole.log(t);");
        assert_ne!(processor.fingerprint(&e), processor.fingerprint(&f));
    }

    #[test]
    fn test_indentation_changes_fingerprint() {
        let processor = ResultProcessor::default();
        let a = request("if x:\n    y()\nz()");
        let b = request("if x:\n    y()\n    z()");
        assert_ne!(processor.fingerprint(&a), processor.fingerprint(&b));
    }

    #[test]
    fn test_context_and_language_are_fingerprinted_timeout_is_not() {
        let processor = ResultProcessor::default();
        let base = request("echo hi");
        let with_ctx = request("echo hi").with_context("env", "ci");
        let as_shell = request("echo hi").with_language(Language::Shell);
        let longer = ExecutionRequest::new("echo hi", Duration::from_secs(60));

        assert_ne!(processor.fingerprint(&base), processor.fingerprint(&with_ctx));
        assert_ne!(processor.fingerprint(&base), processor.fingerprint(&as_shell));
        assert_eq!(processor.fingerprint(&base), processor.fingerprint(&longer));
    }

    #[test]
    fn test_family_ignores_names_and_literals() {
        let processor = ResultProcessor::default();
        let a = request("import numpy\nvalue = numpy.zeros(10)\nprint('a')");
        let b = request("import pandas\nframe = pandas.zeros(99)\nprint(\"other\")");
        let c = request("for i in range(3):\n    print(i)");

        assert_ne!(processor.fingerprint(&a), processor.fingerprint(&b));
        assert_eq!(processor.family(&a), processor.family(&b));
        assert_ne!(processor.family(&a), processor.family(&c));
        assert_eq!(processor.family(&a).as_str().len(), FAMILY_KEY_LEN);
    }

    #[test]
    fn test_category_mapping() {
        let processor = ResultProcessor::default();

        assert_eq!(processor.categorize(&ok("x", "")), ResultCategory::Success);
        assert_eq!(
            processor.categorize(&ok("x", "DeprecationWarning: old api")),
            ResultCategory::Partial
        );

        let failed = ExecutionResult::failed(
            ErrorCategory::Runtime,
            Some(1),
            CapturedOutput::default(),
            started(),
            Duration::from_millis(1),
        );
        assert_eq!(processor.categorize(&failed), ResultCategory::Failure);

        let timeout = ExecutionResult::timed_out(CapturedOutput::default(), started(), Duration::from_secs(1));
        assert_eq!(processor.categorize(&timeout), ResultCategory::Timeout);

        let cancelled = ExecutionResult::cancelled(CapturedOutput::default(), started(), Duration::ZERO);
        assert_eq!(processor.categorize(&cancelled), ResultCategory::Cancelled);
    }

    #[test]
    fn test_only_cancelled_results_are_uncacheable() {
        let processor = ResultProcessor::default();
        let req = request("while True: pass");
        let timeout = ExecutionResult::timed_out(CapturedOutput::default(), started(), Duration::from_secs(1));
        let cancelled = ExecutionResult::cancelled(CapturedOutput::default(), started(), Duration::ZERO);

        assert!(processor.process(&timeout, &req).is_cacheable());
        assert!(!processor.process(&cancelled, &req).is_cacheable());
    }

    #[test]
    fn test_summary_and_metadata() {
        let processor = ResultProcessor::default();
        let enhanced = processor.process(&ok("a\nb\n", ""), &request("print('a'); print('b')"));
        assert_eq!(enhanced.metadata.stdout_lines, 2);
        assert!(!enhanced.metadata.has_stderr);
        assert_eq!(
            enhanced.summary,
            "success | exit 0 | error none | 42ms | 4 bytes output | python"
        );
    }

    #[test]
    fn test_process_batch() {
        let processor = ResultProcessor::default();
        let raws = [ok("1", ""), ok("2", "")];
        let reqs = [request("print(1)"), request("print(2)")];
        let batch = processor.process_batch(raws.iter().zip(reqs.iter()));
        assert_eq!(batch.len(), 2);
        assert_ne!(batch[0].fingerprint, batch[1].fingerprint);
    }
}
