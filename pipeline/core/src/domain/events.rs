// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::ErrorCategory;
use crate::domain::export::ExportFormat;
use crate::domain::optimization::{PatternId, PatternKind};
use crate::domain::profile::ComplexityLevel;
use crate::domain::result::{Fingerprint, ResultCategory};

/// Events published by the pipeline as results move through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ExecutionStarted {
        fingerprint: Fingerprint,
        started_at: DateTime<Utc>,
    },
    ExecutionCompleted {
        fingerprint: Fingerprint,
        category: ResultCategory,
        error_category: ErrorCategory,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },
    CacheHit {
        fingerprint: Fingerprint,
        hit_at: DateTime<Utc>,
    },
    CacheEvicted {
        fingerprint: Fingerprint,
        evicted_at: DateTime<Utc>,
    },
    ProfileUpdated {
        complexity: ComplexityLevel,
        sample_count: u64,
        updated_at: DateTime<Utc>,
    },
    PatternDetected {
        pattern_id: PatternId,
        kind: PatternKind,
        frequency: usize,
        detected_at: DateTime<Utc>,
    },
    RecommendationsSynthesized {
        fingerprint: Fingerprint,
        count: usize,
        synthesized_at: DateTime<Utc>,
    },
    ExportCompleted {
        export_id: Uuid,
        format: ExportFormat,
        record_count: usize,
        exported_at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            PipelineEvent::ExecutionStarted { fingerprint, .. }
            | PipelineEvent::ExecutionCompleted { fingerprint, .. }
            | PipelineEvent::CacheHit { fingerprint, .. }
            | PipelineEvent::CacheEvicted { fingerprint, .. }
            | PipelineEvent::RecommendationsSynthesized { fingerprint, .. } => Some(fingerprint),
            PipelineEvent::ProfileUpdated { .. }
            | PipelineEvent::PatternDetected { .. }
            | PipelineEvent::ExportCompleted { .. } => None,
        }
    }
}
