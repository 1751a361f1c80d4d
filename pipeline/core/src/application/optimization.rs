// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Optimization Engine
//!
//! Scans a cache snapshot together with the profiler's class statistics for
//! three recurring patterns:
//!
//! - **repeated failure**: failed or timed-out results with the same
//!   [`ErrorCategory`] inside one code family;
//! - **slow path**: results whose duration sits well above their complexity
//!   class's distribution, when that is true of at least half a family;
//! - **cache thrash**: a family that keeps being evicted while rarely hit.
//!
//! Only patterns seen at least `min_occurrences` times are reported, and
//! [`OptimizationEngine::recommend`] re-checks the same threshold.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use crate::domain::cache::CacheSnapshot;
use crate::domain::config::OptimizerConfig;
use crate::domain::events::PipelineEvent;
use crate::domain::execution::ErrorCategory;
use crate::domain::optimization::{
    OptimizationRecommendation, OptimizationStrategy, PatternAnalysis, PatternId, PatternKind,
    Trend,
};
use crate::domain::profile::{ComplexityLevel, ExecutionProfile};
use crate::domain::result::{CodeFamily, EnhancedResult, ResultCategory};
use crate::infrastructure::event_bus::EventBus;

const MAX_CONFIDENCE: f64 = 0.95;
const CONFIDENCE_STEP: f64 = 0.05;
/// Relative change between the older and newer half of a group that counts
/// as a trend.
const TREND_THRESHOLD: f64 = 0.1;

pub struct OptimizationEngine {
    config: OptimizerConfig,
    min_samples: u64,
    events: Option<EventBus>,
}

impl OptimizationEngine {
    /// `min_samples` is the profiler's threshold: classes with fewer samples
    /// are too thin to call anything slow.
    pub fn new(config: OptimizerConfig, min_samples: u64) -> Self {
        Self {
            config,
            min_samples,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn min_occurrences(&self) -> usize {
        self.config.min_occurrences.max(1)
    }

    pub fn analyze(&self, snapshot: &CacheSnapshot, profiles: &[ExecutionProfile]) -> Vec<PatternAnalysis> {
        let mut patterns = self.repeated_failures(snapshot);
        patterns.extend(self.slow_paths(snapshot, profiles));
        patterns.extend(self.cache_thrash(snapshot));
        patterns.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
                .then_with(|| a.id.cmp(&b.id))
        });

        info!(
            entries = snapshot.entries.len(),
            patterns = patterns.len(),
            "Optimization analysis complete"
        );
        if let Some(events) = &self.events {
            let now = Utc::now();
            for pattern in &patterns {
                events.publish(PipelineEvent::PatternDetected {
                    pattern_id: pattern.id.clone(),
                    kind: pattern.kind,
                    frequency: pattern.frequency,
                    detected_at: now,
                });
            }
        }
        patterns
    }

    /// `None` below the occurrence threshold; that is not an error.
    pub fn recommend(&self, pattern: &PatternAnalysis) -> Option<OptimizationRecommendation> {
        if pattern.frequency < self.min_occurrences() {
            debug!(
                pattern = %pattern.id,
                frequency = pattern.frequency,
                "Pattern below occurrence threshold"
            );
            return None;
        }

        let (strategy, base, rationale, expected_benefit) = self.strategy_for(pattern);
        let extra = (pattern.frequency - self.min_occurrences()) as f64;
        let confidence = (base + CONFIDENCE_STEP * extra).min(MAX_CONFIDENCE);

        let mut parameters = BTreeMap::new();
        parameters.insert("frequency".to_string(), pattern.frequency.to_string());
        if let Some(family) = &pattern.family {
            parameters.insert("family".to_string(), family.to_string());
        }
        if let Some(category) = pattern.error_category {
            parameters.insert("error_category".to_string(), category.to_string());
        }
        if let Some(complexity) = pattern.complexity {
            parameters.insert("complexity".to_string(), complexity.to_string());
        }
        if let Some(mean) = pattern.mean_duration_ms {
            parameters.insert("mean_duration_ms".to_string(), format!("{mean:.1}"));
        }
        if let Some(hit_rate) = pattern.hit_rate {
            parameters.insert("hit_rate".to_string(), format!("{hit_rate:.3}"));
        }

        Some(OptimizationRecommendation {
            strategy,
            rationale,
            expected_benefit,
            confidence,
            parameters,
            pattern: pattern.clone(),
        })
    }

    pub fn recommend_all(&self, patterns: &[PatternAnalysis]) -> Vec<OptimizationRecommendation> {
        patterns.iter().filter_map(|p| self.recommend(p)).collect()
    }

    /// Highest-confidence recommendation; earlier patterns win ties.
    pub fn best_recommendation(&self, patterns: &[PatternAnalysis]) -> Option<OptimizationRecommendation> {
        self.recommend_all(patterns)
            .into_iter()
            .reduce(|best, next| {
                if next.confidence > best.confidence {
                    next
                } else {
                    best
                }
            })
    }

    fn repeated_failures(&self, snapshot: &CacheSnapshot) -> Vec<PatternAnalysis> {
        let mut groups: BTreeMap<(ErrorCategory, CodeFamily), Vec<&EnhancedResult>> = BTreeMap::new();
        for result in snapshot.results().filter(|r| r.is_failure()) {
            groups
                .entry((result.error_category(), result.family.clone()))
                .or_default()
                .push(result);
        }

        groups
            .into_iter()
            .filter_map(|((category, family), results)| {
                let affected: BTreeSet<_> = results.iter().map(|r| r.fingerprint.clone()).collect();
                if affected.len() < self.min_occurrences() {
                    return None;
                }
                debug!(%category, %family, occurrences = affected.len(), "Repeated failure detected");
                Some(PatternAnalysis {
                    id: pattern_id(PatternKind::RepeatedFailure, &format!("{category}:{family}")),
                    kind: PatternKind::RepeatedFailure,
                    frequency: affected.len(),
                    affected,
                    family: Some(family),
                    error_category: Some(category),
                    complexity: None,
                    mean_duration_ms: Some(mean_duration(&results)),
                    hit_rate: None,
                    trend: None,
                    first_seen: first_seen(&results, snapshot.taken_at),
                })
            })
            .collect()
    }

    fn slow_paths(&self, snapshot: &CacheSnapshot, profiles: &[ExecutionProfile]) -> Vec<PatternAnalysis> {
        let by_class: HashMap<ComplexityLevel, &ExecutionProfile> = profiles
            .iter()
            .filter(|p| p.sample_count >= self.min_samples.max(1))
            .map(|p| (p.complexity, p))
            .collect();

        // (class, family) -> (all results, slow results)
        let mut groups: BTreeMap<(ComplexityLevel, CodeFamily), (usize, Vec<&EnhancedResult>)> =
            BTreeMap::new();
        for result in snapshot
            .results()
            .filter(|r| r.category != ResultCategory::Cancelled)
        {
            let Some(profile) = by_class.get(&result.complexity) else {
                continue;
            };
            let group = groups
                .entry((result.complexity, result.family.clone()))
                .or_default();
            group.0 += 1;
            if self.is_slow(result.duration_ms(), profile) {
                group.1.push(result);
            }
        }

        groups
            .into_iter()
            .filter_map(|((complexity, family), (total, slow))| {
                if slow.len() < self.min_occurrences() || slow.len() * 2 < total {
                    return None;
                }
                let affected: BTreeSet<_> = slow.iter().map(|r| r.fingerprint.clone()).collect();
                let trend = trend(&slow);
                debug!(%complexity, %family, slow = slow.len(), total, ?trend, "Slow path detected");
                Some(PatternAnalysis {
                    id: pattern_id(PatternKind::SlowPath, &format!("{complexity}:{family}")),
                    kind: PatternKind::SlowPath,
                    frequency: affected.len(),
                    affected,
                    family: Some(family),
                    error_category: None,
                    complexity: Some(complexity),
                    mean_duration_ms: Some(mean_duration(&slow)),
                    hit_rate: None,
                    trend: Some(trend),
                    first_seen: first_seen(&slow, snapshot.taken_at),
                })
            })
            .collect()
    }

    fn cache_thrash(&self, snapshot: &CacheSnapshot) -> Vec<PatternAnalysis> {
        snapshot
            .churn
            .iter()
            .filter(|churn| {
                churn.evictions as usize >= self.min_occurrences()
                    && churn.hit_rate() < self.config.thrash_hit_rate
            })
            .map(|churn| {
                let live: Vec<&EnhancedResult> = snapshot
                    .results()
                    .filter(|r| r.family == churn.family)
                    .collect();
                debug!(
                    family = %churn.family,
                    evictions = churn.evictions,
                    hit_rate = churn.hit_rate(),
                    "Cache thrash detected"
                );
                PatternAnalysis {
                    id: pattern_id(PatternKind::CacheThrash, churn.family.as_str()),
                    kind: PatternKind::CacheThrash,
                    frequency: churn.evictions as usize,
                    affected: churn.evicted.clone(),
                    family: Some(churn.family.clone()),
                    error_category: None,
                    complexity: None,
                    mean_duration_ms: (!live.is_empty()).then(|| mean_duration(&live)),
                    hit_rate: Some(churn.hit_rate()),
                    trend: None,
                    first_seen: first_seen(&live, snapshot.taken_at),
                }
            })
            .collect()
    }

    fn is_slow(&self, duration_ms: f64, profile: &ExecutionProfile) -> bool {
        duration_ms > profile.mean_ms + self.config.slow_sigma * profile.std_dev_ms()
            && duration_ms > self.config.slow_ratio * profile.mean_ms
    }

    fn strategy_for(&self, pattern: &PatternAnalysis) -> (OptimizationStrategy, f64, String, String) {
        let family = pattern
            .family
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        match pattern.kind {
            PatternKind::RepeatedFailure => match pattern.error_category.unwrap_or(ErrorCategory::Runtime) {
                ErrorCategory::Dependency => (
                    OptimizationStrategy::ResolveDependencies,
                    0.7,
                    format!(
                        "{} snippets in family {} fail to resolve an import or module",
                        pattern.frequency, family
                    ),
                    "Eliminates repeated dependency failures".to_string(),
                ),
                ErrorCategory::Syntax => (
                    OptimizationStrategy::PreflightValidation,
                    0.75,
                    format!(
                        "{} snippets in family {} fail to parse; validate before spawning",
                        pattern.frequency, family
                    ),
                    "Skips process spawns for code that cannot run".to_string(),
                ),
                ErrorCategory::Permission => (
                    OptimizationStrategy::ReviewPermissions,
                    0.7,
                    format!(
                        "{} snippets in family {} were denied by the operating system",
                        pattern.frequency, family
                    ),
                    "Removes permission failures from the execution path".to_string(),
                ),
                ErrorCategory::Timeout => (
                    OptimizationStrategy::SplitExecution,
                    0.6,
                    format!(
                        "{} snippets in family {} exceed their timeout",
                        pattern.frequency, family
                    ),
                    "Smaller units finish inside the timeout".to_string(),
                ),
                ErrorCategory::Runtime | ErrorCategory::None => (
                    OptimizationStrategy::RetryAggressive,
                    0.5,
                    format!(
                        "{} snippets in family {} fail at runtime",
                        pattern.frequency, family
                    ),
                    "Recovers transient runtime failures".to_string(),
                ),
            },
            PatternKind::SlowPath => {
                let mean = pattern.mean_duration_ms.unwrap_or_default();
                let heavy = matches!(
                    pattern.complexity,
                    Some(ComplexityLevel::Complex | ComplexityLevel::Expert)
                );
                if heavy {
                    (
                        OptimizationStrategy::SplitExecution,
                        0.6,
                        format!(
                            "{} complex snippets in family {} run well above their class (mean {:.0}ms)",
                            pattern.frequency, family, mean
                        ),
                        format!("Up to {mean:.0}ms per execution"),
                    )
                } else if pattern.trend == Some(Trend::Degrading) {
                    (
                        OptimizationStrategy::ProfileHeavy,
                        0.6,
                        format!(
                            "Snippets in family {} are slow and getting slower (mean {:.0}ms)",
                            family, mean
                        ),
                        "Locates the regression before it spreads".to_string(),
                    )
                } else {
                    (
                        OptimizationStrategy::CacheAggressive,
                        0.65,
                        format!(
                            "{} snippets in family {} are consistently slow (mean {:.0}ms); keep their results longer",
                            pattern.frequency, family, mean
                        ),
                        format!("Saves about {mean:.0}ms per repeated execution"),
                    )
                }
            }
            PatternKind::CacheThrash => (
                OptimizationStrategy::CacheConservative,
                0.65,
                format!(
                    "Family {} was evicted {} times with a hit rate of {:.0}%",
                    family,
                    pattern.frequency,
                    pattern.hit_rate.unwrap_or_default() * 100.0
                ),
                "Stops the family from displacing useful entries".to_string(),
            ),
        }
    }
}

fn pattern_id(kind: PatternKind, key: &str) -> PatternId {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    PatternId::new(format!("{}-{}", kind.as_str(), &digest[..12]))
}

fn mean_duration(results: &[&EnhancedResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.duration_ms()).sum::<f64>() / results.len() as f64
}

fn first_seen(results: &[&EnhancedResult], fallback: DateTime<Utc>) -> DateTime<Utc> {
    results.iter().map(|r| r.created_at).min().unwrap_or(fallback)
}

/// Compares the older half of a group with the newer half.
fn trend(results: &[&EnhancedResult]) -> Trend {
    if results.len() < 2 {
        return Trend::Stable;
    }
    let mut ordered: Vec<&EnhancedResult> = results.to_vec();
    ordered.sort_by_key(|r| r.created_at);
    let (older, newer) = ordered.split_at(ordered.len() / 2);
    let before = mean_duration(older);
    let after = mean_duration(newer);
    if before <= 0.0 {
        return Trend::Stable;
    }
    let change = (after - before) / before;
    if change > TREND_THRESHOLD {
        Trend::Degrading
    } else if change < -TREND_THRESHOLD {
        Trend::Improving
    } else {
        Trend::Stable
    }
}
