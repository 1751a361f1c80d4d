// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Detected patterns and the optimization strategies proposed for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::execution::ErrorCategory;
use crate::domain::profile::ComplexityLevel;
use crate::domain::result::{CodeFamily, Fingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    RepeatedFailure,
    SlowPath,
    CacheThrash,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::RepeatedFailure => "repeated_failure",
            PatternKind::SlowPath => "slow_path",
            PatternKind::CacheThrash => "cache_thrash",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of durations within a slow-path group, oldest half versus
/// newest half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
}

/// Stable identifier derived from a pattern's kind and grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub id: PatternId,
    pub kind: PatternKind,
    pub frequency: usize,
    pub affected: BTreeSet<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<CodeFamily>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<ComplexityLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    pub first_seen: DateTime<Utc>,
}

impl PatternAnalysis {
    pub fn touches(&self, fingerprint: &Fingerprint, family: &CodeFamily) -> bool {
        self.affected.contains(fingerprint) || self.family.as_ref() == Some(family)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Longer TTL and pinning for results that are cheap to keep.
    CacheAggressive,
    /// Larger capacity or separate budget for a family that keeps evicting itself.
    CacheConservative,
    SplitExecution,
    ProfileHeavy,
    RetryAggressive,
    ResolveDependencies,
    PreflightValidation,
    ReviewPermissions,
}

impl OptimizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStrategy::CacheAggressive => "cache_aggressive",
            OptimizationStrategy::CacheConservative => "cache_conservative",
            OptimizationStrategy::SplitExecution => "split_execution",
            OptimizationStrategy::ProfileHeavy => "profile_heavy",
            OptimizationStrategy::RetryAggressive => "retry_aggressive",
            OptimizationStrategy::ResolveDependencies => "resolve_dependencies",
            OptimizationStrategy::PreflightValidation => "preflight_validation",
            OptimizationStrategy::ReviewPermissions => "review_permissions",
        }
    }
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub strategy: OptimizationStrategy,
    pub rationale: String,
    pub expected_benefit: String,
    pub confidence: f64,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub pattern: PatternAnalysis,
}
