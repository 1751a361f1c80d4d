// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Result Cache
//!
//! Fingerprint-keyed store of [`EnhancedResult`]s with bounded capacity,
//! least-recently-used eviction, optional TTL and hit/miss accounting.
//!
//! # Concurrency
//!
//! Entries sit behind one `RwLock`. Lookups take the read lock only: hit
//! counters and access stamps are atomics, so concurrent readers never block
//! each other. Inserts, evictions, expiry removal and `clear` take the write
//! lock, which makes them strictly serialized.
//!
//! Recency is ordered by a logical access clock rather than wall time, so
//! "least recently used" is exact even when two accesses share a timestamp.
//! The eviction victim is the entry with the smallest
//! `(last access, hit count, creation)` triple.
//!
//! # Single-flight
//!
//! [`ResultCache::resolve`] guarantees at most one live execution per
//! fingerprint. The first caller to miss installs a shared flight; later
//! callers join it. The flight writes its (cacheable) result into the cache
//! *before* leaving the in-flight table, so a caller never misses both.

use chrono::{DateTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::cache::{
    CacheEntry, CacheError, CacheSnapshot, CacheStatistics, FamilyChurn,
};
use crate::domain::config::CacheConfig;
use crate::domain::events::PipelineEvent;
use crate::domain::result::{CodeFamily, EnhancedResult, Fingerprint};
use crate::domain::runtime::InfraError;
use crate::infrastructure::event_bus::EventBus;

type SharedExecution = Shared<BoxFuture<'static, Result<EnhancedResult, InfraError>>>;

struct Slot {
    result: EnhancedResult,
    created_at: DateTime<Utc>,
    created_seq: u64,
    last_access_seq: AtomicU64,
    last_accessed_nanos: AtomicI64,
    hit_count: AtomicU64,
}

impl Slot {
    fn new(result: EnhancedResult, created_at: DateTime<Utc>, seq: u64) -> Self {
        Self {
            result,
            created_at,
            created_seq: seq,
            last_access_seq: AtomicU64::new(seq),
            last_accessed_nanos: AtomicI64::new(nanos(created_at)),
            hit_count: AtomicU64::new(0),
        }
    }

    fn eviction_key(&self) -> (u64, u64, u64) {
        (
            self.last_access_seq.load(Ordering::SeqCst),
            self.hit_count.load(Ordering::SeqCst),
            self.created_seq,
        )
    }

    fn to_entry(&self, fingerprint: &Fingerprint) -> CacheEntry {
        CacheEntry {
            fingerprint: fingerprint.clone(),
            result: self.result.clone(),
            created_at: self.created_at,
            last_accessed_at: Utc.timestamp_nanos(self.last_accessed_nanos.load(Ordering::SeqCst)),
            hit_count: self.hit_count.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
struct Churn {
    inserts: u64,
    hits: AtomicU64,
    evictions: u64,
    evicted: BTreeSet<Fingerprint>,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<Fingerprint, Slot>,
    churn: HashMap<CodeFamily, Churn>,
}

struct Flight {
    id: u64,
    execution: SharedExecution,
    cancel: CancellationToken,
}

struct Inner {
    capacity: usize,
    ttl: Option<Duration>,
    state: RwLock<CacheState>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
    inflight: Mutex<HashMap<Fingerprint, Flight>>,
    flight_ids: AtomicU64,
    events: RwLock<Option<EventBus>>,
}

/// How a [`ResultCache::resolve`] call was satisfied.
pub enum Resolution {
    Cached(EnhancedResult),
    InFlight(FlightHandle),
}

/// A claim on a shared in-flight execution.
pub struct FlightHandle {
    execution: SharedExecution,
    cancel: CancellationToken,
    leader: bool,
}

impl FlightHandle {
    /// Token shared by every caller of this flight. Cancelling it stops the
    /// execution for all of them.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True for the caller whose miss started the execution.
    pub fn is_leader(&self) -> bool {
        self.leader
    }

    pub async fn wait(self) -> Result<EnhancedResult, InfraError> {
        self.execution.await
    }
}

#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Inner>,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::CapacityMisconfigured { capacity });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                capacity,
                ttl,
                state: RwLock::new(CacheState::default()),
                clock: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                expired: AtomicU64::new(0),
                inflight: Mutex::new(HashMap::new()),
                flight_ids: AtomicU64::new(0),
                events: RwLock::new(None),
            }),
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::new(config.capacity, config.ttl)
    }

    /// Attach an event bus for hit and eviction events. Every clone of this
    /// cache publishes to it; a previously attached bus is replaced.
    pub fn with_event_bus(self, events: EventBus) -> Self {
        if self.inner.events.write().replace(events).is_some() {
            warn!("Replacing the event bus already attached to the result cache");
        }
        self
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<EnhancedResult> {
        self.lookup(fingerprint, true)
    }

    /// Reads an entry without touching counters or recency.
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let now = Utc::now();
        let state = self.inner.state.read();
        state
            .slots
            .get(fingerprint)
            .filter(|slot| !self.is_expired(slot, now))
            .map(|slot| slot.to_entry(fingerprint))
    }

    /// Inserts or overwrites. Returns the fingerprint evicted to make room,
    /// if any.
    pub fn put(&self, fingerprint: Fingerprint, result: EnhancedResult) -> Option<Fingerprint> {
        let now = Utc::now();
        let seq = self.tick();
        let family = result.family.clone();

        let evicted = {
            let mut state = self.inner.state.write();
            state.slots.insert(fingerprint.clone(), Slot::new(result, now, seq));
            state.churn.entry(family).or_default().inserts += 1;

            if state.slots.len() > self.inner.capacity {
                self.evict_one(&mut state)
            } else {
                None
            }
        };

        debug!(fingerprint = %fingerprint.short(), "Cached result");
        if let Some(victim) = &evicted {
            debug!(evicted = %victim.short(), "Evicted least recently used entry");
            self.publish(PipelineEvent::CacheEvicted {
                fingerprint: victim.clone(),
                evicted_at: now,
            });
        }
        evicted
    }

    pub fn statistics(&self) -> CacheStatistics {
        let total_entries = self.len();
        CacheStatistics {
            total_entries,
            capacity: self.inner.capacity,
            hits: self.inner.hits.load(Ordering::SeqCst),
            misses: self.inner.misses.load(Ordering::SeqCst),
            eviction_count: self.inner.evictions.load(Ordering::SeqCst),
            expired_count: self.inner.expired.load(Ordering::SeqCst),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        self.statistics().hit_rate()
    }

    /// Consistent copy of entries, statistics and per-family churn.
    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.inner.state.read();
        let mut slots: Vec<_> = state.slots.iter().collect();
        slots.sort_by_key(|(_, slot)| slot.created_seq);
        let entries = slots
            .into_iter()
            .map(|(fingerprint, slot)| slot.to_entry(fingerprint))
            .collect();

        let mut churn: Vec<FamilyChurn> = state
            .churn
            .iter()
            .map(|(family, counters)| FamilyChurn {
                family: family.clone(),
                inserts: counters.inserts,
                hits: counters.hits.load(Ordering::SeqCst),
                evictions: counters.evictions,
                evicted: counters.evicted.clone(),
            })
            .collect();
        churn.sort_by(|a, b| a.family.cmp(&b.family));

        CacheSnapshot {
            taken_at: Utc::now(),
            entries,
            statistics: CacheStatistics {
                total_entries: state.slots.len(),
                capacity: self.inner.capacity,
                hits: self.inner.hits.load(Ordering::SeqCst),
                misses: self.inner.misses.load(Ordering::SeqCst),
                eviction_count: self.inner.evictions.load(Ordering::SeqCst),
                expired_count: self.inner.expired.load(Ordering::SeqCst),
            },
            churn,
        }
    }

    /// Most frequently hit entries, most hits first.
    pub fn hot_entries(&self, top_n: usize) -> Vec<CacheEntry> {
        let mut entries = self.snapshot().entries;
        entries.sort_by(|a, b| {
            b.hit_count
                .cmp(&a.hit_count)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        entries.truncate(top_n);
        entries
    }

    /// Removes every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let Some(_) = self.inner.ttl else {
            return 0;
        };
        let now = Utc::now();
        let mut state = self.inner.state.write();
        let before = state.slots.len();
        state.slots.retain(|_, slot| !self.is_expired(slot, now));
        let removed = before - state.slots.len();
        if removed > 0 {
            self.inner.expired.fetch_add(removed as u64, Ordering::SeqCst);
            info!("Removed {} expired cache entries", removed);
        }
        removed
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        self.inner.state.write().slots.clear();
    }

    /// Returns the cached result, or joins or starts the single execution for
    /// `fingerprint`.
    ///
    /// `work` runs at most once per flight, on its own task, with the
    /// flight's cancellation token. Must be called from within a tokio
    /// runtime.
    pub fn resolve<F, Fut>(&self, fingerprint: &Fingerprint, work: F) -> Resolution
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<EnhancedResult, InfraError>> + Send + 'static,
    {
        if let Some(result) = self.lookup(fingerprint, true) {
            return Resolution::Cached(result);
        }

        let mut inflight = self.inner.inflight.lock();
        if let Some(flight) = inflight.get(fingerprint) {
            debug!(fingerprint = %fingerprint.short(), "Joining in-flight execution");
            return Resolution::InFlight(FlightHandle {
                execution: flight.execution.clone(),
                cancel: flight.cancel.clone(),
                leader: false,
            });
        }
        // A flight may have finished between the miss above and taking the lock.
        if let Some(result) = self.lookup(fingerprint, false) {
            return Resolution::Cached(result);
        }

        let id = self.inner.flight_ids.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let work = work(cancel.clone());
        let cache = self.clone();
        let key = fingerprint.clone();
        let task = tokio::spawn(async move {
            let outcome = work.await;
            if let Ok(result) = &outcome {
                if result.is_cacheable() {
                    cache.put(key.clone(), result.clone());
                }
            }
            cache.finish_flight(&key, id);
            outcome
        });

        let cache = self.clone();
        let key = fingerprint.clone();
        let execution = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    cache.finish_flight(&key, id);
                    Err(InfraError::TaskAborted(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        inflight.insert(
            fingerprint.clone(),
            Flight {
                id,
                execution: execution.clone(),
                cancel: cancel.clone(),
            },
        );
        debug!(fingerprint = %fingerprint.short(), "Started execution flight");

        Resolution::InFlight(FlightHandle {
            execution,
            cancel,
            leader: true,
        })
    }

    /// [`resolve`](Self::resolve) and wait for the outcome.
    pub async fn get_or_execute<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        work: F,
    ) -> Result<EnhancedResult, InfraError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<EnhancedResult, InfraError>> + Send + 'static,
    {
        match self.resolve(fingerprint, work) {
            Resolution::Cached(result) => Ok(result),
            Resolution::InFlight(handle) => handle.wait().await,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Fingerprints that are cached or have an execution in flight.
    pub fn fingerprints(&self) -> HashSet<Fingerprint> {
        // A flight caches its result before leaving the in-flight table, so
        // reading flights first cannot miss one that finishes in between.
        let mut live: HashSet<Fingerprint> = self.inner.inflight.lock().keys().cloned().collect();
        live.extend(self.inner.state.read().slots.keys().cloned());
        live
    }

    /// Reinserts persisted entries, keeping their timestamps and hit counts.
    /// Entries are replayed oldest access first so recency order survives.
    pub(crate) fn restore(&self, mut entries: Vec<CacheEntry>) -> usize {
        let now = Utc::now();
        entries.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        let skip = entries.len().saturating_sub(self.inner.capacity);

        let mut state = self.inner.state.write();
        let mut restored = 0;
        for entry in entries.into_iter().skip(skip) {
            let slot = Slot {
                result: entry.result,
                created_at: entry.created_at,
                created_seq: self.tick(),
                last_access_seq: AtomicU64::new(self.tick()),
                last_accessed_nanos: AtomicI64::new(nanos(entry.last_accessed_at)),
                hit_count: AtomicU64::new(entry.hit_count),
            };
            if self.is_expired(&slot, now) {
                continue;
            }
            state.slots.insert(entry.fingerprint, slot);
            restored += 1;
        }
        while state.slots.len() > self.inner.capacity {
            if self.evict_one(&mut state).is_none() {
                break;
            }
        }
        restored
    }

    fn lookup(&self, fingerprint: &Fingerprint, record_miss: bool) -> Option<EnhancedResult> {
        let now = Utc::now();
        {
            let state = self.inner.state.read();
            match state.slots.get(fingerprint) {
                Some(slot) if !self.is_expired(slot, now) => {
                    return Some(self.record_hit(&state, fingerprint, slot, now));
                }
                Some(_) => {}
                None => {
                    if record_miss {
                        self.inner.misses.fetch_add(1, Ordering::SeqCst);
                    }
                    return None;
                }
            }
        }

        // Expired: drop it under the write lock, unless it was replaced meanwhile.
        let mut state = self.inner.state.write();
        let still_expired = state
            .slots
            .get(fingerprint)
            .map(|slot| self.is_expired(slot, now));
        match still_expired {
            Some(true) => {
                state.slots.remove(fingerprint);
                self.inner.expired.fetch_add(1, Ordering::SeqCst);
                debug!(fingerprint = %fingerprint.short(), "Cache entry expired");
            }
            Some(false) => {
                if let Some(slot) = state.slots.get(fingerprint) {
                    return Some(self.record_hit(&state, fingerprint, slot, now));
                }
            }
            None => {}
        }
        if record_miss {
            self.inner.misses.fetch_add(1, Ordering::SeqCst);
        }
        None
    }

    fn record_hit(
        &self,
        state: &CacheState,
        fingerprint: &Fingerprint,
        slot: &Slot,
        now: DateTime<Utc>,
    ) -> EnhancedResult {
        slot.hit_count.fetch_add(1, Ordering::SeqCst);
        slot.last_access_seq.store(self.tick(), Ordering::SeqCst);
        slot.last_accessed_nanos.store(nanos(now), Ordering::SeqCst);
        if let Some(churn) = state.churn.get(&slot.result.family) {
            churn.hits.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.hits.fetch_add(1, Ordering::SeqCst);
        self.publish(PipelineEvent::CacheHit {
            fingerprint: fingerprint.clone(),
            hit_at: now,
        });
        slot.result.clone()
    }

    fn evict_one(&self, state: &mut CacheState) -> Option<Fingerprint> {
        let victim = state
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.eviction_key())
            .map(|(fingerprint, _)| fingerprint.clone())?;
        let slot = state.slots.remove(&victim)?;

        let churn = state.churn.entry(slot.result.family.clone()).or_default();
        churn.evictions += 1;
        churn.evicted.insert(victim.clone());
        self.inner.evictions.fetch_add(1, Ordering::SeqCst);
        Some(victim)
    }

    fn finish_flight(&self, fingerprint: &Fingerprint, id: u64) {
        let mut inflight = self.inner.inflight.lock();
        if inflight.get(fingerprint).is_some_and(|flight| flight.id == id) {
            inflight.remove(fingerprint);
        }
    }

    fn is_expired(&self, slot: &Slot, now: DateTime<Utc>) -> bool {
        match self.inner.ttl {
            Some(ttl) => (now - slot.created_at)
                .to_std()
                .map(|age| age >= ttl)
                .unwrap_or(false),
            None => false,
        }
    }

    fn tick(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(events) = self.inner.events.read().as_ref() {
            events.publish(event);
        }
    }
}

fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::{CapturedOutput, ExecutionResult, Language};
    use crate::domain::profile::ComplexityLevel;
    use crate::domain::result::{ResultCategory, ResultMetadata};
    use std::sync::atomic::AtomicUsize;

    fn result(fp: &str, family: &str) -> EnhancedResult {
        let raw = ExecutionResult::succeeded(
            CapturedOutput {
                stdout: format!("{fp}\n"),
                ..CapturedOutput::default()
            },
            Utc::now(),
            Duration::from_millis(10),
        );
        EnhancedResult {
            fingerprint: Fingerprint::new(fp),
            family: CodeFamily::new(family),
            category: ResultCategory::Success,
            complexity: ComplexityLevel::Trivial,
            created_at: raw.completed_at(),
            summary: "ok".to_string(),
            metadata: ResultMetadata {
                language: Language::Python,
                stdout_bytes: raw.stdout.len(),
                stderr_bytes: 0,
                stdout_lines: 1,
                has_stderr: false,
                exit_code: Some(0),
                output_truncated: false,
            },
            raw,
        }
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::new(s)
    }

    async fn never_runs(_cancel: CancellationToken) -> Result<EnhancedResult, InfraError> {
        Err(InfraError::TaskAborted("work must not run".to_string()))
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            ResultCache::new(0, None),
            Err(CacheError::CapacityMisconfigured { capacity: 0 })
        ));
    }

    #[test]
    fn test_put_then_get_returns_result() {
        let cache = ResultCache::new(4, None).unwrap();
        let r = result("a", "fam");
        cache.put(fp("a"), r.clone());
        assert_eq!(cache.get(&fp("a")), Some(r));
        assert_eq!(cache.get(&fp("missing")), None);

        let stats = cache.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = ResultCache::new(4, None).unwrap();
        cache.put(fp("a"), result("a", "fam"));
        let mut newer = result("a", "fam");
        newer.summary = "newer".to_string();
        cache.put(fp("a"), newer.clone());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fp("a")), Some(newer));
    }

    #[test]
    fn test_lru_eviction_respects_access() {
        let cache = ResultCache::new(2, None).unwrap();
        cache.put(fp("A"), result("A", "f"));
        cache.put(fp("B"), result("B", "f"));
        assert!(cache.get(&fp("A")).is_some());
        let evicted = cache.put(fp("C"), result("C", "f"));

        assert_eq!(evicted, Some(fp("B")));
        assert!(cache.peek(&fp("A")).is_some());
        assert!(cache.peek(&fp("C")).is_some());
        assert!(cache.peek(&fp("B")).is_none());
        assert_eq!(cache.statistics().eviction_count, 1);
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let cache = ResultCache::new(3, None).unwrap();
        for i in 0..10 {
            let key = format!("k{i}");
            cache.put(fp(&key), result(&key, "f"));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.statistics().eviction_count, 7);
    }

    #[test]
    fn test_peek_does_not_count() {
        let cache = ResultCache::new(2, None).unwrap();
        cache.put(fp("A"), result("A", "f"));
        assert!(cache.peek(&fp("A")).is_some());
        assert!(cache.peek(&fp("Z")).is_none());
        let stats = cache.statistics();
        assert_eq!(stats.hits + stats.misses, 0);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = ResultCache::new(2, Some(Duration::ZERO)).unwrap();
        cache.put(fp("A"), result("A", "f"));
        assert_eq!(cache.get(&fp("A")), None);

        let stats = cache.statistics();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired_count, 1);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = ResultCache::new(4, Some(Duration::ZERO)).unwrap();
        cache.put(fp("A"), result("A", "f"));
        cache.put(fp("B"), result("B", "f"));
        assert_eq!(cache.cleanup_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_family_churn_tracks_evictions_and_hits() {
        let cache = ResultCache::new(1, None).unwrap();
        cache.put(fp("a1"), result("a1", "alpha"));
        cache.put(fp("a2"), result("a2", "alpha"));
        cache.get(&fp("a2"));
        cache.put(fp("b1"), result("b1", "beta"));

        let snapshot = cache.snapshot();
        let alpha = snapshot
            .churn
            .iter()
            .find(|c| c.family.as_str() == "alpha")
            .unwrap();
        assert_eq!(alpha.inserts, 2);
        assert_eq!(alpha.hits, 1);
        assert_eq!(alpha.evictions, 2);
        assert_eq!(alpha.evicted.len(), 2);
        assert_eq!(snapshot.entries.len(), 1);
    }

    #[test]
    fn test_hot_entries_sorted_by_hits() {
        let cache = ResultCache::new(4, None).unwrap();
        for key in ["a", "b", "c"] {
            cache.put(fp(key), result(key, "f"));
        }
        for _ in 0..3 {
            cache.get(&fp("b"));
        }
        cache.get(&fp("c"));

        let hot = cache.hot_entries(2);
        assert_eq!(hot.len(), 2);
        assert_eq!(hot[0].fingerprint, fp("b"));
        assert_eq!(hot[0].hit_count, 3);
        assert_eq!(hot[1].fingerprint, fp("c"));
    }

    #[test]
    fn test_statistics_is_a_detached_copy() {
        let cache = ResultCache::new(4, None).unwrap();
        let before = cache.statistics();
        cache.put(fp("a"), result("a", "f"));
        cache.get(&fp("a"));
        assert_eq!(before.hits, 0);
        assert_eq!(before.total_entries, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_runs_work_once() {
        let cache = ResultCache::new(8, None).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let key = fp("shared");

        let mut waiters = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let runs = runs.clone();
            let key = key.clone();
            waiters.push(tokio::spawn(async move {
                cache
                    .get_or_execute(&key, move |_cancel| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, InfraError>(result("shared", "f"))
                    })
                    .await
            }));
        }

        for waiter in waiters {
            let r = waiter.await.unwrap().unwrap();
            assert_eq!(r.fingerprint, fp("shared"));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.peek(&key).is_some());
    }

    #[tokio::test]
    async fn test_cancelled_flight_is_not_cached() {
        let cache = ResultCache::new(8, None).unwrap();
        let key = fp("slow");

        let resolution = cache.resolve(&key, |cancel| async move {
            let started = Utc::now();
            cancel.cancelled().await;
            let raw = ExecutionResult::cancelled(CapturedOutput::default(), started, Duration::ZERO);
            let mut r = result("slow", "f");
            r.category = ResultCategory::Cancelled;
            r.raw = raw;
            Ok::<_, InfraError>(r)
        });
        let Resolution::InFlight(leader) = resolution else {
            panic!("expected a new flight");
        };
        assert!(leader.is_leader());

        let Resolution::InFlight(follower) = cache.resolve(&key, never_runs) else {
            panic!("expected to join the flight");
        };
        assert!(!follower.is_leader());

        follower.cancel_token().cancel();
        let a = leader.wait().await.unwrap();
        let b = follower.wait().await.unwrap();
        assert_eq!(a.category, ResultCategory::Cancelled);
        assert_eq!(a, b);
        assert!(cache.peek(&key).is_none());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_flight_propagates_infra_error() {
        let cache = ResultCache::new(8, None).unwrap();
        let err = cache
            .get_or_execute(&fp("x"), |_| async {
                Err::<EnhancedResult, _>(InfraError::ProcessSpawnFailed {
                    program: "python3".to_string(),
                    reason: "not found".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, InfraError::ProcessSpawnFailed { .. }));
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_resolve_serves_cached_result() {
        let cache = ResultCache::new(8, None).unwrap();
        cache.put(fp("x"), result("x", "f"));
        assert!(matches!(
            cache.resolve(&fp("x"), never_runs),
            Resolution::Cached(_)
        ));
    }

    #[test]
    fn test_event_bus_attached_after_sharing_reaches_every_clone() {
        let cache = ResultCache::new(1, None).unwrap();
        let shared = cache.clone();
        let events = EventBus::new(8);
        let mut receiver = events.subscribe();
        let _cache = cache.with_event_bus(events);

        shared.put(Fingerprint::new("a"), result("a", "fam"));
        shared.put(Fingerprint::new("b"), result("b", "fam"));

        match receiver.try_recv() {
            Ok(PipelineEvent::CacheEvicted { fingerprint, .. }) => {
                assert_eq!(fingerprint, Fingerprint::new("a"));
            }
            other => panic!("expected an eviction event, got {other:?}"),
        }
    }
}
