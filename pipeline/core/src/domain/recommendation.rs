// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Actionable code recommendations and where they came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::domain::optimization::{OptimizationStrategy, PatternId};
use crate::domain::profile::ComplexityLevel;
use crate::domain::result::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    Performance,
    Correctness,
    Style,
    Security,
}

impl RecommendationType {
    /// Report order: security first, style last.
    pub const BY_SEVERITY: [RecommendationType; 4] = [
        RecommendationType::Security,
        RecommendationType::Correctness,
        RecommendationType::Performance,
        RecommendationType::Style,
    ];

    /// Higher is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            RecommendationType::Security => 3,
            RecommendationType::Correctness => 2,
            RecommendationType::Performance => 1,
            RecommendationType::Style => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Performance => "performance",
            RecommendationType::Correctness => "correctness",
            RecommendationType::Style => "style",
            RecommendationType::Security => "security",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            RecommendationType::Performance => "Performance",
            RecommendationType::Correctness => "Correctness",
            RecommendationType::Style => "Style",
            RecommendationType::Security => "Security",
        }
    }
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

/// Signal that contributed to a recommendation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Result {
        fingerprint: Fingerprint,
    },
    Profile {
        complexity: ComplexityLevel,
    },
    Optimization {
        pattern_id: PatternId,
        strategy: OptimizationStrategy,
    },
    StaticScan {
        rule: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRecommendation {
    pub recommendation_type: RecommendationType,
    /// Deduplication key: two candidates with the same type and topic
    /// describe the same underlying issue.
    pub topic: String,
    pub text: String,
    pub confidence: f64,
    pub fingerprint: Fingerprint,
    pub provenance: Vec<Provenance>,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_savings_ms: Option<f64>,
    pub effort: Effort,
}

impl CodeRecommendation {
    /// Total ranking order: severity, confidence descending, earliest
    /// detection, then topic so that no two distinct entries tie.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .recommendation_type
            .severity()
            .cmp(&self.recommendation_type.severity())
            .then_with(|| other.confidence.total_cmp(&self.confidence))
            .then_with(|| self.detected_at.cmp(&other.detected_at))
            .then_with(|| self.topic.cmp(&other.topic))
            .then_with(|| self.fingerprint.cmp(&other.fingerprint))
    }
}
