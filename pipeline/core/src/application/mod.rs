// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod exporter;
pub mod optimization;
pub mod pipeline;
pub mod processor;
pub mod profiler;
pub mod recommendation;

// Re-export the stage services for convenience
pub use exporter::ResultExporter;
pub use optimization::OptimizationEngine;
pub use pipeline::{ExecutionPipeline, PendingExecution, PipelineError};
pub use processor::ResultProcessor;
pub use profiler::{BatchForecast, PerformanceProfiler};
pub use recommendation::RecommendationEngine;
