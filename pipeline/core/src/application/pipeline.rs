// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution Pipeline
//!
//! Entry point that wires the stages together:
//!
//! ```text
//! runtime -> processor -> cache + profiler -> optimizer -> recommender -> exporter
//! ```
//!
//! The pipeline owns the one [`ResultCache`] instance for its lifetime. It is
//! created with the pipeline (optionally warmed from a snapshot) and flushed
//! by [`ExecutionPipeline::shutdown`].
//!
//! Every fingerprint the pipeline has seen carries a [`ResultState`] that
//! only moves forward: re-running analysis or recommendation never moves a
//! result back to an earlier state.
//!
//! Per-fingerprint bookkeeping (state, source, recommendations, profiler
//! class) is swept once it outgrows twice the cache capacity; only results
//! that are cached or still executing survive a sweep.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::exporter::ResultExporter;
use crate::application::optimization::OptimizationEngine;
use crate::application::processor::ResultProcessor;
use crate::application::profiler::PerformanceProfiler;
use crate::application::recommendation::RecommendationEngine;
use crate::domain::cache::CacheError;
use crate::domain::config::PipelineConfig;
use crate::domain::events::PipelineEvent;
use crate::domain::execution::ExecutionRequest;
use crate::domain::export::{ExportBundle, ExportError, ExportFormat, ExportMetadata};
use crate::domain::optimization::{OptimizationRecommendation, PatternAnalysis};
use crate::domain::recommendation::CodeRecommendation;
use crate::domain::result::{EnhancedResult, Fingerprint, ResultState};
use crate::domain::runtime::{CodeRuntime, InfraError};
use crate::infrastructure::cache::{Resolution, ResultCache};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::executor::ProcessExecutor;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Infra(#[from] InfraError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("no cached result for fingerprint {0}")]
    UnknownFingerprint(Fingerprint),
}

/// Latest optimization pass.
#[derive(Debug, Clone, Default)]
struct Analysis {
    patterns: Vec<PatternAnalysis>,
    optimizations: Vec<OptimizationRecommendation>,
}

struct PipelineInner {
    config: PipelineConfig,
    runtime: Arc<dyn CodeRuntime>,
    processor: ResultProcessor,
    cache: ResultCache,
    profiler: PerformanceProfiler,
    optimizer: OptimizationEngine,
    recommender: RecommendationEngine,
    exporter: ResultExporter,
    events: EventBus,
    states: RwLock<HashMap<Fingerprint, ResultState>>,
    sources: RwLock<HashMap<Fingerprint, String>>,
    analysis: RwLock<Analysis>,
    recommendations: RwLock<BTreeMap<Fingerprint, Vec<CodeRecommendation>>>,
}

impl PipelineInner {
    fn advance(&self, fingerprint: &Fingerprint, to: ResultState) {
        let mut states = self.states.write();
        let state = states.entry(fingerprint.clone()).or_default();
        *state = state.advance(to);
    }

    fn sweep_if_oversized(&self) {
        let limit = self.cache.capacity().saturating_mul(2);
        if self.states.read().len() > limit {
            self.sweep();
        }
    }

    /// Forgets every fingerprint that is neither cached nor executing.
    fn sweep(&self) {
        // submit holds `sources` until its flight is registered
        let mut sources = self.sources.write();
        let live = self.cache.fingerprints();
        let before = self.states.read().len();

        sources.retain(|fingerprint, _| live.contains(fingerprint));
        self.states.write().retain(|fingerprint, _| live.contains(fingerprint));
        self.recommendations
            .write()
            .retain(|fingerprint, _| live.contains(fingerprint));
        let forgotten = self
            .profiler
            .retain_fingerprints(|fingerprint| live.contains(fingerprint));

        debug!(
            live = live.len(),
            dropped = before.saturating_sub(live.len()),
            profiler_forgotten = forgotten,
            "Swept bookkeeping for evicted results"
        );
    }
}

#[derive(Clone)]
pub struct ExecutionPipeline {
    inner: Arc<PipelineInner>,
}

/// An execution started with [`ExecutionPipeline::submit`].
pub struct PendingExecution {
    fingerprint: Fingerprint,
    cancel: CancellationToken,
    join: JoinHandle<Result<EnhancedResult, PipelineError>>,
}

impl PendingExecution {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Stops the execution. Identical requests share one execution, so every
    /// caller waiting on this fingerprint receives the cancelled result.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<EnhancedResult, PipelineError> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => Err(InfraError::TaskAborted(e.to_string()).into()),
        }
    }
}

impl ExecutionPipeline {
    /// Wires a pipeline around an existing runtime and cache.
    pub fn new(
        config: PipelineConfig,
        runtime: Arc<dyn CodeRuntime>,
        cache: ResultCache,
        events: EventBus,
    ) -> Self {
        let processor = ResultProcessor::new(&config.processor);
        let profiler = PerformanceProfiler::new(config.profiler.clone()).with_event_bus(events.clone());
        let optimizer = OptimizationEngine::new(config.optimizer.clone(), config.profiler.min_samples)
            .with_event_bus(events.clone());
        let recommender = RecommendationEngine::new(config.recommender.clone()).with_event_bus(events.clone());

        let states = cache
            .snapshot()
            .entries
            .into_iter()
            .map(|entry| (entry.fingerprint, ResultState::Cached))
            .collect();

        Self {
            inner: Arc::new(PipelineInner {
                config,
                runtime,
                processor,
                cache,
                profiler,
                optimizer,
                recommender,
                exporter: ResultExporter::new(),
                events,
                states: RwLock::new(states),
                sources: RwLock::new(HashMap::new()),
                analysis: RwLock::new(Analysis::default()),
                recommendations: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Builds the process-backed pipeline described by `config`, restoring
    /// the cache snapshot when one is configured.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let events = EventBus::with_default_capacity();
        let cache = ResultCache::from_config(&config.cache)?.with_event_bus(events.clone());
        if let Some(path) = &config.cache.snapshot_path {
            cache.load_snapshot(path)?;
        }
        let runtime: Arc<dyn CodeRuntime> = Arc::new(ProcessExecutor::new(config.executor.clone()));
        info!(
            max_concurrency = config.executor.max_concurrency,
            cache_capacity = config.cache.capacity,
            "Execution pipeline ready"
        );
        Ok(Self::new(config, runtime, cache, events))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn profiler(&self) -> &PerformanceProfiler {
        &self.inner.profiler
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn fingerprint(&self, request: &ExecutionRequest) -> Fingerprint {
        self.inner.processor.fingerprint(request)
    }

    /// Runs `request`, or returns the cached result for its fingerprint.
    /// Concurrent identical requests share one execution.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<EnhancedResult, PipelineError> {
        self.submit(request).wait().await
    }

    /// Starts `request` in the background. Must be called from within a
    /// tokio runtime.
    pub fn submit(&self, request: ExecutionRequest) -> PendingExecution {
        let fingerprint = self.inner.processor.fingerprint(&request);
        let resolution = {
            let mut sources = self.inner.sources.write();
            self.inner.advance(&fingerprint, ResultState::Pending);
            sources
                .entry(fingerprint.clone())
                .or_insert_with(|| request.code.clone());

            let inner = self.inner.clone();
            let key = fingerprint.clone();
            self.inner.cache.resolve(&fingerprint, move |cancel| {
                run_and_profile(inner, key, request, cancel)
            })
        };
        self.inner.sweep_if_oversized();

        let (cancel, join) = match resolution {
            Resolution::Cached(result) => {
                debug!(fingerprint = %fingerprint.short(), "Served from cache");
                let join = tokio::spawn(async move { Ok(result) });
                (CancellationToken::new(), join)
            }
            Resolution::InFlight(handle) => {
                let cancel = handle.cancel_token();
                let join = tokio::spawn(async move { handle.wait().await.map_err(PipelineError::from) });
                (cancel, join)
            }
        };

        PendingExecution {
            fingerprint,
            cancel,
            join,
        }
    }

    /// Scans the cache and profiles for recurring patterns and records the
    /// optimization recommendations they support.
    pub fn analyze(&self) -> Vec<PatternAnalysis> {
        let snapshot = self.inner.cache.snapshot();
        let profiles = self.inner.profiler.profiles();
        let patterns = self.inner.optimizer.analyze(&snapshot, &profiles);
        let optimizations = self.inner.optimizer.recommend_all(&patterns);

        for entry in &snapshot.entries {
            self.inner.advance(&entry.fingerprint, ResultState::Analyzed);
        }
        info!(
            patterns = patterns.len(),
            optimizations = optimizations.len(),
            "Analysis recorded"
        );

        *self.inner.analysis.write() = Analysis {
            patterns: patterns.clone(),
            optimizations,
        };
        patterns
    }

    /// Re-analyzes and returns the optimization recommendations.
    pub fn optimize(&self) -> Vec<OptimizationRecommendation> {
        self.analyze();
        self.inner.analysis.read().optimizations.clone()
    }

    pub fn patterns(&self) -> Vec<PatternAnalysis> {
        self.inner.analysis.read().patterns.clone()
    }

    /// Synthesizes recommendations for one cached result against the latest
    /// analysis.
    pub fn recommend(&self, fingerprint: &Fingerprint) -> Result<Vec<CodeRecommendation>, PipelineError> {
        let entry = self
            .inner
            .cache
            .peek(fingerprint)
            .ok_or_else(|| PipelineError::UnknownFingerprint(fingerprint.clone()))?;
        Ok(self.recommend_result(&entry.result))
    }

    /// Recommendations for every cached result, ranked together.
    pub fn recommend_all(&self) -> Vec<CodeRecommendation> {
        let snapshot = self.inner.cache.snapshot();
        let mut all: Vec<_> = snapshot
            .results()
            .flat_map(|result| self.recommend_result(result))
            .collect();
        all.sort_by(CodeRecommendation::rank_cmp);
        all
    }

    /// Everything the pipeline currently knows, ready for export.
    pub fn bundle(&self) -> ExportBundle {
        let snapshot = self.inner.cache.snapshot();
        let analysis = self.inner.analysis.read().clone();
        let cached: HashSet<&Fingerprint> = snapshot.entries.iter().map(|entry| &entry.fingerprint).collect();
        let mut recommendations: Vec<_> = self
            .inner
            .recommendations
            .read()
            .iter()
            .filter(|(fingerprint, _)| cached.contains(fingerprint))
            .flat_map(|(_, recommendations)| recommendations)
            .cloned()
            .collect();
        recommendations.sort_by(CodeRecommendation::rank_cmp);

        ExportBundle {
            results: snapshot.results().cloned().collect(),
            profiles: self.inner.profiler.profiles(),
            patterns: analysis.patterns,
            optimizations: analysis.optimizations,
            recommendations,
        }
    }

    pub fn export<W: Write>(&self, format: ExportFormat, sink: W) -> Result<ExportMetadata, PipelineError> {
        let bundle = self.bundle();
        let metadata = self.inner.exporter.export(&bundle, format, sink)?;
        for result in &bundle.results {
            self.inner.advance(&result.fingerprint, ResultState::Exported);
        }
        self.inner.events.publish(PipelineEvent::ExportCompleted {
            export_id: metadata.export_id,
            format,
            record_count: metadata.record_count,
            exported_at: metadata.generated_at,
        });
        Ok(metadata)
    }

    pub fn state(&self, fingerprint: &Fingerprint) -> Option<ResultState> {
        self.inner.states.read().get(fingerprint).copied()
    }

    /// Flushes the cache snapshot when one is configured. Returns the number
    /// of entries written.
    pub fn shutdown(&self) -> Result<usize, PipelineError> {
        let in_flight = self.inner.cache.in_flight();
        if in_flight > 0 {
            warn!(in_flight, "Shutting down with executions still in flight");
        }
        let written = match &self.inner.config.cache.snapshot_path {
            Some(path) => self.inner.cache.flush_to(path)?,
            None => 0,
        };
        let statistics = self.inner.cache.statistics();
        info!(
            entries = statistics.total_entries,
            hits = statistics.hits,
            misses = statistics.misses,
            evictions = statistics.eviction_count,
            flushed = written,
            "Execution pipeline shut down"
        );
        Ok(written)
    }

    fn recommend_result(&self, result: &EnhancedResult) -> Vec<CodeRecommendation> {
        let profile = self
            .inner
            .profiler
            .profile_for(&result.fingerprint)
            .or_else(|| self.inner.profiler.profile(result.complexity));
        let optimizations = self.inner.analysis.read().optimizations.clone();
        let source = self.inner.sources.read().get(&result.fingerprint).cloned();

        let recommendations = match &source {
            Some(code) => self.inner.recommender.synthesize_with_source(
                result,
                code,
                profile.as_ref(),
                &optimizations,
            ),
            None => self
                .inner
                .recommender
                .synthesize(result, profile.as_ref(), &optimizations),
        };

        self.inner
            .recommendations
            .write()
            .insert(result.fingerprint.clone(), recommendations.clone());
        self.inner.advance(&result.fingerprint, ResultState::Recommended);
        recommendations
    }
}

/// Body of one execution flight: run, process, profile.
async fn run_and_profile(
    inner: Arc<PipelineInner>,
    fingerprint: Fingerprint,
    request: ExecutionRequest,
    cancel: CancellationToken,
) -> Result<EnhancedResult, InfraError> {
    inner.events.publish(PipelineEvent::ExecutionStarted {
        fingerprint: fingerprint.clone(),
        started_at: Utc::now(),
    });

    let raw = inner.runtime.execute(&request, cancel).await?;
    let result = inner.processor.process(&raw, &request);

    info!(
        fingerprint = %fingerprint.short(),
        category = %result.category,
        error_category = %result.error_category(),
        elapsed_ms = result.raw.execution_time.as_millis() as u64,
        "Execution finished"
    );
    inner.events.publish(PipelineEvent::ExecutionCompleted {
        fingerprint: fingerprint.clone(),
        category: result.category,
        error_category: result.error_category(),
        duration_ms: result.raw.execution_time.as_millis() as u64,
        completed_at: result.created_at,
    });

    if result.is_cacheable() {
        inner.advance(&fingerprint, ResultState::Cached);
    }
    if inner.profiler.observe(&fingerprint, &result).is_some() {
        inner.advance(&fingerprint, ResultState::Profiled);
    }
    Ok(result)
}
