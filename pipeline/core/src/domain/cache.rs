// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cache entries, statistics and snapshots.
//!
//! Everything here is owned data. The live store is
//! `infrastructure::cache::ResultCache`; callers only ever see copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::result::{CodeFamily, EnhancedResult, Fingerprint};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: EnhancedResult,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub eviction_count: u64,
    pub expired_count: u64,
}

impl CacheStatistics {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Insert/hit/eviction accounting for one code family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyChurn {
    pub family: CodeFamily,
    pub inserts: u64,
    pub hits: u64,
    pub evictions: u64,
    pub evicted: BTreeSet<Fingerprint>,
}

impl FamilyChurn {
    pub fn new(family: CodeFamily) -> Self {
        Self {
            family,
            inserts: 0,
            hits: 0,
            evictions: 0,
            evicted: BTreeSet::new(),
        }
    }

    /// Share of cache traffic for this family that was served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let traffic = self.hits + self.inserts;
        if traffic == 0 {
            0.0
        } else {
            self.hits as f64 / traffic as f64
        }
    }
}

/// Point-in-time copy of the cache handed to analysis stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<CacheEntry>,
    pub statistics: CacheStatistics,
    pub churn: Vec<FamilyChurn>,
}

impl CacheSnapshot {
    pub fn results(&self) -> impl Iterator<Item = &EnhancedResult> {
        self.entries.iter().map(|entry| &entry.result)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache capacity must be at least 1 (configured: {capacity})")]
    CapacityMisconfigured { capacity: usize },

    #[error("cache snapshot I/O failed for {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
