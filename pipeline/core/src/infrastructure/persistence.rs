// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cache snapshot file: one JSON-encoded [`CacheEntry`] per line.
//!
//! A missing file is an empty cache. Lines that fail to parse are skipped
//! with a warning. Writes go to a temporary file in the same directory that
//! is renamed over the target, so readers never see a half-written snapshot.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::domain::cache::{CacheEntry, CacheError};
use crate::infrastructure::cache::ResultCache;

impl ResultCache {
    /// Loads a snapshot into the cache. Returns the number of live entries
    /// restored.
    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No cache snapshot at {:?}; starting with an empty cache", path);
                return Ok(0);
            }
            Err(source) => {
                return Err(CacheError::Persistence {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| CacheError::Persistence {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CacheEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping malformed cache snapshot line {}: {}", index + 1, e),
            }
        }

        let restored = self.restore(entries);
        info!("Restored {} cache entries from {:?}", restored, path);
        Ok(restored)
    }

    /// Writes every live entry to `path`. Returns the number written.
    pub fn flush_to(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| CacheError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().map_err(io_err)?,
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let entries = self.snapshot().entries;
        let staging = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(staging.as_file());
            for entry in &entries {
                serde_json::to_writer(&mut writer, entry)?;
                writer.write_all(b"\n").map_err(io_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        staging.persist(path).map_err(|e| io_err(e.error))?;

        info!("Flushed {} cache entries to {:?}", entries.len(), path);
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::{CapturedOutput, ExecutionResult, Language};
    use crate::domain::profile::ComplexityLevel;
    use crate::domain::result::{CodeFamily, EnhancedResult, Fingerprint, ResultCategory, ResultMetadata};
    use chrono::Utc;
    use std::time::Duration;

    fn result(fp: &str) -> EnhancedResult {
        let raw = ExecutionResult::succeeded(CapturedOutput::default(), Utc::now(), Duration::from_millis(3));
        EnhancedResult {
            fingerprint: Fingerprint::new(fp),
            family: CodeFamily::new("fam"),
            category: ResultCategory::Success,
            complexity: ComplexityLevel::Trivial,
            created_at: raw.completed_at(),
            summary: "ok".to_string(),
            metadata: ResultMetadata {
                language: Language::Python,
                stdout_bytes: 0,
                stderr_bytes: 0,
                stdout_lines: 0,
                has_stderr: false,
                exit_code: Some(0),
                output_truncated: false,
            },
            raw,
        }
    }

    #[test]
    fn test_missing_snapshot_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(4, None).unwrap();
        assert_eq!(cache.load_snapshot(dir.path().join("absent.jsonl")).unwrap(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_flush_and_reload_preserves_entries_and_recency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");

        let cache = ResultCache::new(2, None).unwrap();
        cache.put(Fingerprint::new("A"), result("A"));
        std::thread::sleep(Duration::from_millis(2));
        cache.put(Fingerprint::new("B"), result("B"));
        std::thread::sleep(Duration::from_millis(2));
        cache.get(&Fingerprint::new("A"));
        assert_eq!(cache.flush_to(&path).unwrap(), 2);

        let reloaded = ResultCache::new(2, None).unwrap();
        assert_eq!(reloaded.load_snapshot(&path).unwrap(), 2);
        assert_eq!(
            reloaded.peek(&Fingerprint::new("A")).unwrap().hit_count,
            1
        );

        // B was least recently used before the restart and still is.
        reloaded.put(Fingerprint::new("C"), result("C"));
        assert!(reloaded.peek(&Fingerprint::new("B")).is_none());
        assert!(reloaded.peek(&Fingerprint::new("A")).is_some());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        let good = serde_json::to_string(&CacheEntry {
            fingerprint: Fingerprint::new("A"),
            result: result("A"),
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
            hit_count: 0,
        })
        .unwrap();
        std::fs::write(&path, format!("{{not json}}\n{good}\n\n")).unwrap();

        let cache = ResultCache::new(4, None).unwrap();
        assert_eq!(cache.load_snapshot(&path).unwrap(), 1);
    }
}
