// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Recommendation Engine
//!
//! Collects candidate recommendations for one result from four signals (the
//! result itself, its complexity profile, optimization recommendations whose
//! pattern covers it, and a static scan of the source), merges candidates
//! that describe the same issue, and ranks what is left.
//!
//! Candidates are the same issue when they share a type and a topic. The
//! merged recommendation keeps the highest confidence, the union of
//! provenance and the earliest detection time.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::domain::config::RecommenderConfig;
use crate::domain::events::PipelineEvent;
use crate::domain::execution::ErrorCategory;
use crate::domain::optimization::{OptimizationRecommendation, OptimizationStrategy};
use crate::domain::profile::{ComplexityLevel, ExecutionProfile};
use crate::domain::recommendation::{
    CodeRecommendation, Effort, Provenance, RecommendationType,
};
use crate::domain::result::{EnhancedResult, Fingerprint, ResultCategory};
use crate::infrastructure::event_bus::EventBus;

const EXCERPT_CHARS: usize = 160;

struct ScanRule {
    name: &'static str,
    pattern: Regex,
    confidence: f64,
    advice: &'static str,
}

static SCAN_RULES: LazyLock<Vec<ScanRule>> = LazyLock::new(|| {
    let rule = |name, pattern: &str, confidence, advice| ScanRule {
        name,
        pattern: Regex::new(pattern)
            .unwrap_or_else(|e| unreachable!("scan rule {name} is valid: {e}")),
        confidence,
        advice,
    };
    vec![
        rule(
            "eval",
            r"\beval\s*\(",
            0.8,
            "Avoid eval(); parse the input explicitly instead of executing it",
        ),
        rule(
            "exec",
            r"\bexec\s*\(",
            0.75,
            "Avoid exec(); dynamic code execution hides what actually runs",
        ),
        rule(
            "os-system",
            r"\bos\.system\s*\(",
            0.8,
            "Replace os.system() with subprocess.run() and an argument list",
        ),
        rule(
            "shell-true",
            r"shell\s*=\s*True",
            0.85,
            "Drop shell=True and pass the command as an argument list",
        ),
        rule(
            "rm-rf-root",
            r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+/(\s|\*|$)",
            0.95,
            "Recursive delete of the filesystem root; remove this command",
        ),
        rule(
            "curl-pipe-sh",
            r"(curl|wget)[^|\n]*\|\s*(sudo\s+)?(ba|z)?sh\b",
            0.9,
            "Download scripts to a file and verify them before running",
        ),
    ]
});

pub struct RecommendationEngine {
    config: RecommenderConfig,
    events: Option<EventBus>,
}

impl RecommendationEngine {
    pub fn new(config: RecommenderConfig) -> Self {
        Self { config, events: None }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn synthesize(
        &self,
        result: &EnhancedResult,
        profile: Option<&ExecutionProfile>,
        optimizations: &[OptimizationRecommendation],
    ) -> Vec<CodeRecommendation> {
        self.synthesize_inner(result, None, profile, optimizations)
    }

    /// Like [`synthesize`](Self::synthesize), with the snippet's source
    /// available for the static scan.
    pub fn synthesize_with_source(
        &self,
        result: &EnhancedResult,
        code: &str,
        profile: Option<&ExecutionProfile>,
        optimizations: &[OptimizationRecommendation],
    ) -> Vec<CodeRecommendation> {
        self.synthesize_inner(result, Some(code), profile, optimizations)
    }

    pub fn filter_by_confidence(
        recommendations: &[CodeRecommendation],
        min_confidence: f64,
    ) -> Vec<CodeRecommendation> {
        recommendations
            .iter()
            .filter(|r| r.confidence >= min_confidence)
            .cloned()
            .collect()
    }

    /// The `n` highest-ranked recommendations.
    pub fn top(recommendations: &[CodeRecommendation], n: usize) -> Vec<CodeRecommendation> {
        let mut ranked = recommendations.to_vec();
        ranked.sort_by(CodeRecommendation::rank_cmp);
        ranked.truncate(n);
        ranked
    }

    fn synthesize_inner(
        &self,
        result: &EnhancedResult,
        code: Option<&str>,
        profile: Option<&ExecutionProfile>,
        optimizations: &[OptimizationRecommendation],
    ) -> Vec<CodeRecommendation> {
        let mut candidates = result_signals(result);
        candidates.extend(profile_signals(result, profile));
        candidates.extend(
            optimizations
                .iter()
                .filter(|opt| opt.pattern.touches(&result.fingerprint, &result.family))
                .map(|opt| optimization_signal(result, opt)),
        );
        if self.config.static_scan {
            if let Some(code) = code {
                candidates.extend(static_scan(result, code));
            }
        }

        let total = candidates.len();
        let mut ranked: Vec<_> = merge(&result.fingerprint, candidates)
            .into_iter()
            .filter(|r| r.confidence >= self.config.min_confidence)
            .collect();
        ranked.sort_by(CodeRecommendation::rank_cmp);
        if let Some(max) = self.config.max_recommendations {
            ranked.truncate(max);
        }

        debug!(
            fingerprint = %result.fingerprint.short(),
            candidates = total,
            kept = ranked.len(),
            "Synthesized recommendations"
        );
        if let Some(events) = &self.events {
            events.publish(PipelineEvent::RecommendationsSynthesized {
                fingerprint: result.fingerprint.clone(),
                count: ranked.len(),
                synthesized_at: Utc::now(),
            });
        }
        ranked
    }
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new(RecommenderConfig::default())
    }
}

struct Candidate {
    kind: RecommendationType,
    topic: &'static str,
    text: String,
    confidence: f64,
    provenance: Provenance,
    detected_at: DateTime<Utc>,
    savings_ms: Option<f64>,
    effort: Effort,
}

fn result_signals(result: &EnhancedResult) -> Vec<Candidate> {
    let provenance = Provenance::Result {
        fingerprint: result.fingerprint.clone(),
    };
    let candidate = |kind, topic, text: String, confidence, effort| Candidate {
        kind,
        topic,
        text,
        confidence,
        provenance: provenance.clone(),
        detected_at: result.created_at,
        savings_ms: None,
        effort,
    };
    let detail = excerpt(&result.raw.stderr);

    let mut out = Vec::new();
    match result.category {
        ResultCategory::Failure => match result.error_category() {
            ErrorCategory::Syntax => out.push(candidate(
                RecommendationType::Correctness,
                "syntax-error",
                format!("Fix the syntax error reported by the interpreter: {detail}"),
                0.9,
                Effort::Low,
            )),
            ErrorCategory::Dependency => out.push(candidate(
                RecommendationType::Correctness,
                "missing-dependency",
                format!("Install or vendor the missing dependency: {detail}"),
                0.85,
                Effort::Low,
            )),
            ErrorCategory::Permission => out.push(candidate(
                RecommendationType::Security,
                "permission-denied",
                format!("The snippet needs access it was not granted; review what it touches: {detail}"),
                0.7,
                Effort::Medium,
            )),
            ErrorCategory::Runtime | ErrorCategory::None | ErrorCategory::Timeout => out.push(candidate(
                RecommendationType::Correctness,
                "runtime-error",
                format!("Handle the runtime failure: {detail}"),
                0.6,
                Effort::Medium,
            )),
        },
        ResultCategory::Timeout => {
            let mut timeout = candidate(
                RecommendationType::Performance,
                "timeout",
                format!(
                    "Execution was stopped after {}ms; bound its loops or split the work",
                    result.raw.execution_time.as_millis()
                ),
                0.8,
                Effort::High,
            );
            timeout.savings_ms = Some(result.duration_ms());
            out.push(timeout);
        }
        ResultCategory::Partial => out.push(candidate(
            RecommendationType::Style,
            "warnings",
            format!("Address the warnings printed on stderr: {detail}"),
            0.5,
            Effort::Low,
        )),
        ResultCategory::Success | ResultCategory::Cancelled => {}
    }

    if result.metadata.output_truncated {
        out.push(candidate(
            RecommendationType::Performance,
            "output-volume",
            "Output exceeded the capture limit; print less or write to a file".to_string(),
            0.5,
            Effort::Low,
        ));
    }
    out
}

fn profile_signals(result: &EnhancedResult, profile: Option<&ExecutionProfile>) -> Vec<Candidate> {
    let provenance = Provenance::Profile {
        complexity: result.complexity,
    };
    let mut out = Vec::new();

    if let Some(profile) = profile.filter(|p| p.sample_count >= 2) {
        let duration = result.duration_ms();
        let threshold = (profile.mean_ms + 2.0 * profile.std_dev_ms()).max(1.5 * profile.mean_ms);
        if result.category != ResultCategory::Timeout && profile.mean_ms > 0.0 && duration > threshold {
            out.push(Candidate {
                kind: RecommendationType::Performance,
                topic: "slow-execution",
                text: format!(
                    "Took {:.0}ms against a {:.0}ms average for {} code; profile the hot path",
                    duration, profile.mean_ms, result.complexity
                ),
                confidence: 0.6,
                provenance: provenance.clone(),
                detected_at: result.created_at,
                savings_ms: Some(duration - profile.mean_ms),
                effort: Effort::Medium,
            });
        }
    }

    let complexity_confidence = match result.complexity {
        ComplexityLevel::Complex => Some(0.55),
        ComplexityLevel::Expert => Some(0.65),
        _ => None,
    };
    if let Some(confidence) = complexity_confidence {
        out.push(Candidate {
            kind: RecommendationType::Style,
            topic: "high-complexity",
            text: format!(
                "{} code: break it into smaller functions with fewer nested loops",
                result.complexity
            ),
            confidence,
            provenance,
            detected_at: result.created_at,
            savings_ms: None,
            effort: Effort::High,
        });
    }
    out
}

fn optimization_signal(result: &EnhancedResult, opt: &OptimizationRecommendation) -> Candidate {
    let timeout_pattern = opt.pattern.error_category == Some(ErrorCategory::Timeout);
    let (kind, topic, effort) = match opt.strategy {
        OptimizationStrategy::ResolveDependencies => {
            (RecommendationType::Correctness, "missing-dependency", Effort::Low)
        }
        OptimizationStrategy::PreflightValidation => {
            (RecommendationType::Correctness, "syntax-error", Effort::Low)
        }
        OptimizationStrategy::RetryAggressive => {
            (RecommendationType::Correctness, "runtime-error", Effort::Medium)
        }
        OptimizationStrategy::ReviewPermissions => {
            (RecommendationType::Security, "permission-denied", Effort::Medium)
        }
        OptimizationStrategy::SplitExecution if timeout_pattern => {
            (RecommendationType::Performance, "timeout", Effort::High)
        }
        OptimizationStrategy::SplitExecution | OptimizationStrategy::ProfileHeavy => {
            (RecommendationType::Performance, "slow-execution", Effort::Medium)
        }
        OptimizationStrategy::CacheAggressive => {
            (RecommendationType::Performance, "caching", Effort::Low)
        }
        OptimizationStrategy::CacheConservative => {
            (RecommendationType::Performance, "cache-churn", Effort::Low)
        }
    };
    let savings_ms = match kind {
        RecommendationType::Performance => opt.pattern.mean_duration_ms,
        _ => None,
    };
    Candidate {
        kind,
        topic,
        text: format!("{} ({})", opt.rationale, opt.expected_benefit),
        confidence: opt.confidence,
        provenance: Provenance::Optimization {
            pattern_id: opt.pattern.id.clone(),
            strategy: opt.strategy,
        },
        detected_at: opt.pattern.first_seen.min(result.created_at),
        savings_ms,
        effort,
    }
}

fn static_scan(result: &EnhancedResult, code: &str) -> Vec<Candidate> {
    SCAN_RULES
        .iter()
        .filter(|rule| rule.pattern.is_match(code))
        .map(|rule| Candidate {
            kind: RecommendationType::Security,
            topic: rule.name,
            text: rule.advice.to_string(),
            confidence: rule.confidence,
            provenance: Provenance::StaticScan {
                rule: rule.name.to_string(),
            },
            detected_at: result.created_at,
            savings_ms: None,
            effort: Effort::Low,
        })
        .collect()
}

fn merge(fingerprint: &Fingerprint, candidates: Vec<Candidate>) -> Vec<CodeRecommendation> {
    let mut merged: BTreeMap<(RecommendationType, &'static str), Candidate> = BTreeMap::new();
    let mut provenance: BTreeMap<(RecommendationType, &'static str), Vec<Provenance>> = BTreeMap::new();

    for candidate in candidates {
        let key = (candidate.kind, candidate.topic);
        provenance
            .entry(key)
            .or_default()
            .push(candidate.provenance.clone());

        match merged.get_mut(&key) {
            None => {
                merged.insert(key, candidate);
            }
            Some(existing) => {
                let detected_at = existing.detected_at.min(candidate.detected_at);
                let savings_ms = match (existing.savings_ms, candidate.savings_ms) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                if candidate.confidence > existing.confidence {
                    *existing = candidate;
                }
                existing.detected_at = detected_at;
                existing.savings_ms = savings_ms;
            }
        }
    }

    merged
        .into_iter()
        .map(|(key, candidate)| {
            let mut sources = provenance.remove(&key).unwrap_or_default();
            sources.sort();
            sources.dedup();
            CodeRecommendation {
                recommendation_type: candidate.kind,
                topic: candidate.topic.to_string(),
                text: candidate.text,
                confidence: candidate.confidence,
                fingerprint: fingerprint.clone(),
                provenance: sources,
                detected_at: candidate.detected_at,
                expected_savings_ms: candidate.savings_ms,
                effort: candidate.effort,
            }
        })
        .collect()
}

/// Last non-empty line of `text`, shortened.
fn excerpt(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .unwrap_or("no diagnostic output");
    if line.chars().count() > EXCERPT_CHARS {
        let cut: String = line.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
