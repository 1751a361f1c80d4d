// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Performance Profiler
//!
//! Accumulates duration statistics per [`ComplexityLevel`] and turns them
//! into [`PerformancePrediction`]s.
//!
//! Each class keeps a Welford running mean and variance over every sample it
//! has seen, plus a bounded window of recent samples for percentiles. The
//! profiler also remembers which class each observed fingerprint fell into,
//! so predictions can be asked for by fingerprint.
//!
//! Prediction confidence is `max(low, n/(n+k) * 1/(1+cv))`, capped below 1.
//! For a fixed coefficient of variation it never decreases as samples grow.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

use crate::domain::config::ProfilerConfig;
use crate::domain::events::PipelineEvent;
use crate::domain::execution::{ExecutionRequest, Language};
use crate::domain::profile::{
    CodeShape, ComplexityLevel, ExecutionProfile, PerformancePrediction, PredictionBasis,
    ProfileError,
};
use crate::domain::result::{EnhancedResult, Fingerprint, ResultCategory};
use crate::infrastructure::event_bus::EventBus;

const MAX_CONFIDENCE: f64 = 0.99;

#[derive(Debug, Clone)]
struct ClassStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    window: VecDeque<f64>,
    updated_at: DateTime<Utc>,
}

impl ClassStats {
    fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            window: VecDeque::new(),
            updated_at,
        }
    }

    fn push(&mut self, sample_ms: f64, window: usize, at: DateTime<Utc>) {
        self.count += 1;
        let delta = sample_ms - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample_ms - self.mean);
        self.min = self.min.min(sample_ms);
        self.max = self.max.max(sample_ms);

        self.window.push_back(sample_ms);
        while self.window.len() > window.max(1) {
            self.window.pop_front();
        }
        self.updated_at = self.updated_at.max(at);
    }

    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    fn to_profile(&self, complexity: ComplexityLevel) -> ExecutionProfile {
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        ExecutionProfile {
            complexity,
            sample_count: self.count,
            mean_ms: self.mean,
            variance_ms: self.variance(),
            min_ms: if self.count == 0 { 0.0 } else { self.min },
            max_ms: if self.count == 0 { 0.0 } else { self.max },
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            updated_at: self.updated_at,
        }
    }
}

/// Linear interpolation between closest ranks. `sorted` must be ascending.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

#[derive(Default)]
struct ProfilerState {
    classes: BTreeMap<ComplexityLevel, ClassStats>,
    fingerprints: HashMap<Fingerprint, ComplexityLevel>,
}

/// Predicted cost of running a batch of requests.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchForecast {
    pub predictions: Vec<PerformancePrediction>,
    pub total: Duration,
    /// Confidence of the least certain prediction in the batch.
    pub confidence: f64,
}

pub struct PerformanceProfiler {
    config: ProfilerConfig,
    state: RwLock<ProfilerState>,
    events: Option<EventBus>,
}

impl PerformanceProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ProfilerState::default()),
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Static classification; never looks at recorded durations.
    pub fn classify(&self, code: &str, language: Language) -> ComplexityLevel {
        CodeShape::measure(code, language).complexity()
    }

    /// Records the duration of `result` against its complexity class.
    /// Cancelled results carry no meaningful duration and are ignored.
    pub fn observe(&self, fingerprint: &Fingerprint, result: &EnhancedResult) -> Option<ExecutionProfile> {
        if result.category == ResultCategory::Cancelled {
            debug!(fingerprint = %fingerprint.short(), "Skipping cancelled result");
            return None;
        }

        let complexity = result.complexity;
        let profile = {
            let mut state = self.state.write();
            state.fingerprints.insert(fingerprint.clone(), complexity);
            let stats = state
                .classes
                .entry(complexity)
                .or_insert_with(|| ClassStats::new(result.created_at));
            stats.push(result.duration_ms(), self.config.window, result.created_at);
            stats.to_profile(complexity)
        };

        debug!(
            fingerprint = %fingerprint.short(),
            %complexity,
            samples = profile.sample_count,
            mean_ms = profile.mean_ms,
            "Profile updated"
        );
        if let Some(events) = &self.events {
            events.publish(PipelineEvent::ProfileUpdated {
                complexity,
                sample_count: profile.sample_count,
                updated_at: profile.updated_at,
            });
        }
        Some(profile)
    }

    /// Prediction for a previously observed fingerprint, or why none can be
    /// made.
    pub fn try_predict(&self, fingerprint: &Fingerprint) -> Result<PerformancePrediction, ProfileError> {
        let complexity = self
            .state
            .read()
            .fingerprints
            .get(fingerprint)
            .copied()
            .ok_or_else(|| ProfileError::UnknownFingerprint(fingerprint.clone()))?;
        self.try_predict_class(complexity)
    }

    /// Never fails: an unknown fingerprint or a thin class yields the
    /// low-confidence default.
    pub fn predict(&self, fingerprint: &Fingerprint) -> PerformancePrediction {
        match self.try_predict(fingerprint) {
            Ok(prediction) => prediction,
            Err(ProfileError::InsufficientSamples {
                complexity, samples, ..
            }) => self.default_prediction(Some(complexity), samples),
            Err(ProfileError::UnknownFingerprint(_)) => self.default_prediction(None, 0),
        }
    }

    pub fn predict_for_code(&self, code: &str, language: Language) -> PerformancePrediction {
        let complexity = self.classify(code, language);
        match self.try_predict_class(complexity) {
            Ok(prediction) => prediction,
            Err(_) => self.default_prediction(Some(complexity), self.sample_count(complexity)),
        }
    }

    pub fn forecast_batch(&self, requests: &[ExecutionRequest]) -> BatchForecast {
        let predictions: Vec<_> = requests
            .iter()
            .map(|request| self.predict_for_code(&request.code, request.language))
            .collect();
        let total = predictions.iter().map(|p| p.predicted).sum();
        let confidence = predictions
            .iter()
            .map(|p| p.confidence)
            .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.min(c))))
            .unwrap_or(self.config.low_confidence);
        BatchForecast {
            predictions,
            total,
            confidence,
        }
    }

    pub fn profile(&self, complexity: ComplexityLevel) -> Option<ExecutionProfile> {
        self.state
            .read()
            .classes
            .get(&complexity)
            .map(|stats| stats.to_profile(complexity))
    }

    /// Every class with at least one sample, ordered by complexity.
    pub fn profiles(&self) -> Vec<ExecutionProfile> {
        self.state
            .read()
            .classes
            .iter()
            .map(|(complexity, stats)| stats.to_profile(*complexity))
            .collect()
    }

    pub fn profile_for(&self, fingerprint: &Fingerprint) -> Option<ExecutionProfile> {
        let complexity = self.state.read().fingerprints.get(fingerprint).copied()?;
        self.profile(complexity)
    }

    pub fn sample_count(&self, complexity: ComplexityLevel) -> u64 {
        self.state
            .read()
            .classes
            .get(&complexity)
            .map_or(0, |stats| stats.count)
    }

    /// Forgets the class of every fingerprint `keep` rejects. Class
    /// statistics are untouched. Returns how many were forgotten.
    pub fn retain_fingerprints(&self, keep: impl Fn(&Fingerprint) -> bool) -> usize {
        let mut state = self.state.write();
        let before = state.fingerprints.len();
        state.fingerprints.retain(|fingerprint, _| keep(fingerprint));
        before - state.fingerprints.len()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.state.read().fingerprints.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.classes.clear();
        state.fingerprints.clear();
    }

    fn try_predict_class(&self, complexity: ComplexityLevel) -> Result<PerformancePrediction, ProfileError> {
        let state = self.state.read();
        let samples = state.classes.get(&complexity).map_or(0, |stats| stats.count);
        let required = self.config.min_samples.max(1);
        let stats = match state.classes.get(&complexity) {
            Some(stats) if samples >= required => stats,
            _ => {
                return Err(ProfileError::InsufficientSamples {
                    complexity,
                    samples,
                    required,
                })
            }
        };

        let mut sorted: Vec<f64> = stats.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let predicted_ms = percentile(&sorted, self.config.prediction_percentile).max(0.0);
        let profile = stats.to_profile(complexity);

        Ok(PerformancePrediction {
            complexity: Some(complexity),
            predicted: Duration::from_micros((predicted_ms * 1000.0).round() as u64),
            confidence: self.confidence(samples, profile.coefficient_of_variation()),
            sample_count: samples,
            basis: PredictionBasis::Observed,
        })
    }

    fn confidence(&self, samples: u64, cv: f64) -> f64 {
        let n = samples as f64;
        let k = self.config.confidence_half_point.max(f64::EPSILON);
        let size = n / (n + k);
        let stability = 1.0 / (1.0 + cv.max(0.0));
        (size * stability)
            .max(self.config.low_confidence)
            .min(MAX_CONFIDENCE)
    }

    fn default_prediction(&self, complexity: Option<ComplexityLevel>, samples: u64) -> PerformancePrediction {
        PerformancePrediction {
            complexity,
            predicted: self.config.default_prediction,
            confidence: self.config.low_confidence,
            sample_count: samples,
            basis: PredictionBasis::Default,
        }
    }
}

impl Default for PerformanceProfiler {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::{CapturedOutput, ExecutionResult};
    use crate::domain::result::{CodeFamily, ResultMetadata};

    fn timed(fp: &str, complexity: ComplexityLevel, ms: u64) -> EnhancedResult {
        let raw = ExecutionResult::succeeded(
            CapturedOutput::default(),
            Utc::now(),
            Duration::from_millis(ms),
        );
        EnhancedResult {
            fingerprint: Fingerprint::new(fp),
            family: CodeFamily::new("fam"),
            category: ResultCategory::Success,
            complexity,
            created_at: raw.completed_at(),
            summary: String::new(),
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

    fn observe_all(profiler: &PerformanceProfiler, complexity: ComplexityLevel, samples: &[u64]) {
        for (i, ms) in samples.iter().enumerate() {
            let result = timed(&format!("fp{i}"), complexity, *ms);
            profiler.observe(&result.fingerprint.clone(), &result);
        }
    }

    #[test]
    fn test_welford_statistics() {
        let profiler = PerformanceProfiler::default();
        observe_all(&profiler, ComplexityLevel::Simple, &[10, 20, 30, 40]);

        let profile = profiler.profile(ComplexityLevel::Simple).unwrap();
        assert_eq!(profile.sample_count, 4);
        assert!((profile.mean_ms - 25.0).abs() < 1e-9);
        // sample variance of 10,20,30,40
        assert!((profile.variance_ms - 166.666_666_666).abs() < 1e-6);
        assert_eq!(profile.min_ms, 10.0);
        assert_eq!(profile.max_ms, 40.0);
        assert!((profile.p50_ms - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentiles_interpolate() {
        let sorted: Vec<f64> = (1..=11).map(|v| v as f64 * 10.0).collect();
        assert_eq!(percentile(&sorted, 50.0), 60.0);
        assert!((percentile(&sorted, 95.0) - 105.0).abs() < 1e-9);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_prediction_defaults_below_min_samples() {
        let profiler = PerformanceProfiler::default();
        observe_all(&profiler, ComplexityLevel::Trivial, &[5, 6]);

        let prediction = profiler.predict(&Fingerprint::new("fp0"));
        assert!(prediction.is_default());
        assert_eq!(prediction.predicted, Duration::from_millis(1000));
        assert_eq!(prediction.confidence, 0.1);
        assert_eq!(prediction.sample_count, 2);

        assert!(matches!(
            profiler.try_predict(&Fingerprint::new("fp0")),
            Err(ProfileError::InsufficientSamples { samples: 2, required: 3, .. })
        ));
    }

    #[test]
    fn test_unknown_fingerprint_gets_default() {
        let profiler = PerformanceProfiler::default();
        let prediction = profiler.predict(&Fingerprint::new("never-seen"));
        assert!(prediction.is_default());
        assert_eq!(prediction.complexity, None);
    }

    #[test]
    fn test_confidence_grows_with_samples_at_fixed_variance() {
        let profiler = PerformanceProfiler::default();
        let mut previous = 0.0;
        for round in 1..=10 {
            observe_all(&profiler, ComplexityLevel::Moderate, &[100, 200]);
            if round < 2 {
                continue;
            }
            let prediction = profiler.predict(&Fingerprint::new("fp0"));
            assert_eq!(prediction.basis, PredictionBasis::Observed);
            assert!(prediction.confidence >= previous);
            assert!(prediction.confidence <= MAX_CONFIDENCE);
            previous = prediction.confidence;
        }
        assert!(previous > 0.1);
    }

    #[test]
    fn test_window_bounds_percentile_samples() {
        let profiler = PerformanceProfiler::new(ProfilerConfig {
            window: 3,
            ..ProfilerConfig::default()
        });
        observe_all(&profiler, ComplexityLevel::Simple, &[1000, 1000, 1000, 1, 1, 1]);
        let profile = profiler.profile(ComplexityLevel::Simple).unwrap();
        assert_eq!(profile.sample_count, 6);
        assert_eq!(profile.p99_ms, 1.0);
        assert_eq!(profile.max_ms, 1000.0);
    }

    #[test]
    fn test_cancelled_results_are_ignored() {
        let profiler = PerformanceProfiler::default();
        let mut result = timed("c", ComplexityLevel::Simple, 10);
        result.category = ResultCategory::Cancelled;
        assert!(profiler.observe(&result.fingerprint.clone(), &result).is_none());
        assert_eq!(profiler.sample_count(ComplexityLevel::Simple), 0);
    }

    #[test]
    fn test_forecast_batch_and_clear() {
        let profiler = PerformanceProfiler::default();
        observe_all(&profiler, ComplexityLevel::Trivial, &[100, 100, 100]);

        let requests = vec![
            ExecutionRequest::new("print(1)", Duration::from_secs(5)),
            ExecutionRequest::new("print(2)", Duration::from_secs(5)),
        ];
        let forecast = profiler.forecast_batch(&requests);
        assert_eq!(forecast.predictions.len(), 2);
        assert_eq!(forecast.total, Duration::from_millis(200));
        assert!(forecast.confidence > 0.1);

        profiler.clear();
        assert!(profiler.profiles().is_empty());
        assert!(profiler.predict_for_code("print(1)", Language::Python).is_default());
    }

    #[test]
    fn test_retain_fingerprints_keeps_class_statistics() {
        let profiler = PerformanceProfiler::default();
        for fp in ["keep", "drop-1", "drop-2"] {
            let result = timed(fp, ComplexityLevel::Simple, 10);
            profiler.observe(&result.fingerprint.clone(), &result);
        }

        let forgotten = profiler.retain_fingerprints(|fp| fp.as_str() == "keep");
        assert_eq!(forgotten, 2);
        assert_eq!(profiler.fingerprint_count(), 1);
        assert!(!matches!(
            profiler.try_predict(&Fingerprint::new("keep")),
            Err(ProfileError::UnknownFingerprint(_))
        ));
        assert!(matches!(
            profiler.try_predict(&Fingerprint::new("drop-1")),
            Err(ProfileError::UnknownFingerprint(_))
        ));
        assert_eq!(profiler.sample_count(ComplexityLevel::Simple), 3);
    }
}
