// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Pipeline Configuration
//
// YAML schema for a crucible pipeline, one section per component:
// - executor: worker pool, queue depth, timeouts, interpreters
// - processor: warning signatures that mark a run as partial
// - cache: capacity, TTL and optional snapshot file
// - profiler / optimizer / recommender: statistical thresholds
// - logging: level and output format
//
// Every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::execution::Language;

pub const CONFIG_PATH_ENV: &str = "CRUCIBLE_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub profiler: ProfilerConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub recommender: RecommenderConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extension of the scratch file the snippet is written to.
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Processes allowed to run at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Requests allowed to wait for a free worker. Defaults to
    /// `max_concurrency`; beyond that, requests are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Per-stream capture limit in bytes.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default = "default_interpreters")]
    pub interpreters: BTreeMap<Language, InterpreterConfig>,
}

impl ExecutorConfig {
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.max_concurrency)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_depth: None,
            default_timeout: default_timeout(),
            max_output_bytes: default_max_output_bytes(),
            interpreters: default_interpreters(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Case-insensitive stderr substrings that turn a successful run into a
    /// partial one.
    #[serde(default = "default_warning_signatures")]
    pub warning_signatures: Vec<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            warning_signatures: default_warning_signatures(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entries older than this are treated as absent. `null` disables expiry.
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Line-delimited JSON snapshot loaded at startup and written at shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl: default_cache_ttl(),
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// Samples needed before a class produces non-default predictions.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,

    /// Recent samples kept per class for percentiles.
    #[serde(default = "default_window")]
    pub window: usize,

    #[serde(default = "default_prediction", with = "humantime_serde")]
    pub default_prediction: Duration,

    #[serde(default = "default_low_confidence")]
    pub low_confidence: f64,

    /// Sample count at which the size factor of the confidence reaches 0.5.
    #[serde(default = "default_confidence_half_point")]
    pub confidence_half_point: f64,

    /// Percentile (0-100) reported as the predicted duration.
    #[serde(default = "default_prediction_percentile")]
    pub prediction_percentile: f64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            window: default_window(),
            default_prediction: default_prediction(),
            low_confidence: default_low_confidence(),
            confidence_half_point: default_confidence_half_point(),
            prediction_percentile: default_prediction_percentile(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,

    /// Standard deviations above the class mean that count as slow.
    #[serde(default = "default_slow_sigma")]
    pub slow_sigma: f64,

    /// Minimum multiple of the class mean that counts as slow.
    #[serde(default = "default_slow_ratio")]
    pub slow_ratio: f64,

    /// Family hit rate under which evictions count as thrash.
    #[serde(default = "default_thrash_hit_rate")]
    pub thrash_hit_rate: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_occurrences: default_min_occurrences(),
            slow_sigma: default_slow_sigma(),
            slow_ratio: default_slow_ratio(),
            thrash_hit_rate: default_thrash_hit_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommenderConfig {
    /// Recommendations below this confidence are dropped.
    #[serde(default)]
    pub min_confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_recommendations: Option<usize>,

    #[serde(default = "default_true")]
    pub static_scan: bool,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            max_recommendations: None,
            static_scan: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    4
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_interpreters() -> BTreeMap<Language, InterpreterConfig> {
    BTreeMap::from([
        (
            Language::Python,
            InterpreterConfig {
                program: "python3".to_string(),
                args: vec!["-B".to_string(), "-u".to_string()],
                extension: "py".to_string(),
            },
        ),
        (
            Language::Shell,
            InterpreterConfig {
                program: "/bin/sh".to_string(),
                args: vec![],
                extension: "sh".to_string(),
            },
        ),
        (
            Language::Javascript,
            InterpreterConfig {
                program: "node".to_string(),
                args: vec![],
                extension: "js".to_string(),
            },
        ),
    ])
}

fn default_warning_signatures() -> Vec<String> {
    vec!["warning".to_string(), "deprecat".to_string()]
}

fn default_cache_capacity() -> usize {
    500
}

fn default_cache_ttl() -> Option<Duration> {
    Some(Duration::from_secs(30 * 60))
}

fn default_min_samples() -> u64 {
    3
}

fn default_window() -> usize {
    1000
}

fn default_prediction() -> Duration {
    Duration::from_millis(1000)
}

fn default_low_confidence() -> f64 {
    0.1
}

fn default_confidence_half_point() -> f64 {
    10.0
}

fn default_prediction_percentile() -> f64 {
    95.0
}

fn default_min_occurrences() -> usize {
    3
}

fn default_slow_sigma() -> f64 {
    2.0
}

fn default_slow_ratio() -> f64 {
    1.5
}

fn default_thrash_hit_rate() -> f64 {
    0.2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PipelineConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string. An empty document yields defaults.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CRUCIBLE_CONFIG_PATH environment variable
    /// 2. ./crucible.yaml (working directory)
    /// 3. ~/.crucible/config.yaml (user home)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./crucible.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".crucible").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Invalid values are
    /// logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("CRUCIBLE_MAX_CONCURRENCY") {
            match val.trim().parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: CRUCIBLE_MAX_CONCURRENCY={}", n);
                    self.executor.max_concurrency = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for CRUCIBLE_MAX_CONCURRENCY: '{}'. Expected a positive integer. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("CRUCIBLE_QUEUE_DEPTH") {
            match val.trim().parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: CRUCIBLE_QUEUE_DEPTH={}", n);
                    self.executor.queue_depth = Some(n);
                }
                Err(_) => tracing::warn!(
                    "Invalid value for CRUCIBLE_QUEUE_DEPTH: '{}'. Expected an integer. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("CRUCIBLE_CACHE_CAPACITY") {
            match val.trim().parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: CRUCIBLE_CACHE_CAPACITY={}", n);
                    self.cache.capacity = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for CRUCIBLE_CACHE_CAPACITY: '{}'. Expected a positive integer. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("CRUCIBLE_CACHE_SNAPSHOT") {
            if val.trim().is_empty() {
                tracing::info!("Environment override: CRUCIBLE_CACHE_SNAPSHOT cleared");
                self.cache.snapshot_path = None;
            } else {
                tracing::info!("Environment override: CRUCIBLE_CACHE_SNAPSHOT={}", val);
                self.cache.snapshot_path = Some(PathBuf::from(val));
            }
        }

        if let Some(val) = lookup("CRUCIBLE_LOG_FORMAT") {
            match val.trim().to_lowercase().as_str() {
                "text" => self.logging.format = LogFormat::Text,
                "json" => self.logging.format = LogFormat::Json,
                _ => tracing::warn!(
                    "Invalid value for CRUCIBLE_LOG_FORMAT: '{}'. Expected text/json. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.executor.max_concurrency == 0 {
            anyhow::bail!("executor.max_concurrency must be at least 1");
        }
        if self.executor.default_timeout.is_zero() {
            anyhow::bail!("executor.default_timeout must be greater than zero");
        }
        if self.executor.max_output_bytes == 0 {
            anyhow::bail!("executor.max_output_bytes must be greater than zero");
        }
        for (language, interpreter) in &self.executor.interpreters {
            if interpreter.program.trim().is_empty() {
                anyhow::bail!("interpreter program for {} cannot be empty", language);
            }
        }

        if self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be at least 1");
        }

        if self.profiler.min_samples == 0 {
            anyhow::bail!("profiler.min_samples must be at least 1");
        }
        if self.profiler.window == 0 {
            anyhow::bail!("profiler.window must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.profiler.low_confidence) {
            anyhow::bail!(
                "profiler.low_confidence must be within [0, 1], got {}",
                self.profiler.low_confidence
            );
        }
        if self.profiler.confidence_half_point <= 0.0 {
            anyhow::bail!("profiler.confidence_half_point must be positive");
        }
        if !(0.0..=100.0).contains(&self.profiler.prediction_percentile) {
            anyhow::bail!(
                "profiler.prediction_percentile must be within [0, 100], got {}",
                self.profiler.prediction_percentile
            );
        }

        if self.optimizer.min_occurrences == 0 {
            anyhow::bail!("optimizer.min_occurrences must be at least 1");
        }
        if self.optimizer.slow_sigma < 0.0 || self.optimizer.slow_ratio < 1.0 {
            anyhow::bail!("optimizer.slow_sigma must be >= 0 and optimizer.slow_ratio >= 1");
        }
        if !(0.0..=1.0).contains(&self.optimizer.thrash_hit_rate) {
            anyhow::bail!("optimizer.thrash_hit_rate must be within [0, 1]");
        }

        if !(0.0..=1.0).contains(&self.recommender.min_confidence) {
            anyhow::bail!(
                "recommender.min_confidence must be within [0, 1], got {}",
                self.recommender.min_confidence
            );
        }

        Ok(())
    }
}
