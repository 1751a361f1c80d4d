// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crucible_core::application::{ExecutionPipeline, ResultExporter};
use crucible_core::domain::config::PipelineConfig;
use crucible_core::domain::execution::{ExecutionRequest, Language};
use crucible_core::domain::export::{ExportBundle, ExportFormat};
use crucible_core::infrastructure::{EventBus, ProcessExecutor, ResultCache};
use std::sync::Arc;
use std::time::Duration;

async fn populated_bundle() -> ExportBundle {
    let config = PipelineConfig::default();
    let events = EventBus::new(256);
    let cache = ResultCache::from_config(&config.cache).unwrap();
    let executor = Arc::new(ProcessExecutor::new(config.executor.clone()));
    let pipeline = ExecutionPipeline::new(config, executor, cache, events);

    let snippets = [
        "echo ok",
        "echo 'a, \"quoted\" <value>'",
        "crucible_missing_cmd_1",
        "crucible_missing_cmd_2",
        "crucible_missing_cmd_3",
    ];
    for code in snippets {
        let request = ExecutionRequest::new(code, Duration::from_secs(5)).with_language(Language::Shell);
        pipeline.execute(request).await.unwrap();
    }
    pipeline.analyze();
    pipeline.optimize();
    pipeline.recommend_all();
    pipeline.bundle()
}

#[tokio::test]
async fn test_json_export_reimports_the_same_records() {
    let bundle = populated_bundle().await;
    assert_eq!(bundle.results.len(), 5);
    assert!(!bundle.recommendations.is_empty());

    let exporter = ResultExporter::new();
    let (json, metadata) = exporter.export_to_string(&bundle, ExportFormat::Json).unwrap();
    assert_eq!(metadata.record_count, bundle.len());

    let (imported_metadata, imported) = exporter.import_json_str(&json).unwrap();
    assert_eq!(imported_metadata.export_id, metadata.export_id);
    assert_eq!(imported_metadata.record_count, metadata.record_count);
    assert_eq!(imported.results, bundle.results);
    assert_eq!(imported.patterns.len(), bundle.patterns.len());
    assert_eq!(imported.optimizations.len(), bundle.optimizations.len());
    assert_eq!(imported.recommendations.len(), bundle.recommendations.len());
    for (before, after) in bundle.recommendations.iter().zip(&imported.recommendations) {
        assert_eq!(before.fingerprint, after.fingerprint);
        assert_eq!(before.topic, after.topic);
        assert_eq!(before.provenance, after.provenance);
        assert!((before.confidence - after.confidence).abs() < 1e-12);
    }
}

#[tokio::test]
async fn test_every_format_renders_a_populated_bundle() {
    let bundle = populated_bundle().await;
    let exporter = ResultExporter::new();

    let (markdown, _) = exporter.export_to_string(&bundle, ExportFormat::Markdown).unwrap();
    assert!(markdown.contains("### Correctness"));
    assert!(markdown.find("### Security") < markdown.find("### Style"));

    let (csv, metadata) = exporter.export_to_string(&bundle, ExportFormat::Csv).unwrap();
    let mut rows = csv.lines();
    assert_eq!(rows.next(), Some("fingerprint,type,confidence,text"));
    assert_eq!(metadata.record_count, bundle.recommendations.len());

    let (html, _) = exporter.export_to_string(&bundle, ExportFormat::Html).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.matches("<tr>").count() > bundle.results.len());
}

#[test]
fn test_empty_bundle_exports_cleanly() {
    let exporter = ResultExporter::new();
    let (json, metadata) = exporter
        .export_to_string(&ExportBundle::default(), ExportFormat::Json)
        .unwrap();
    assert_eq!(metadata.record_count, 0);
    let (_, imported) = exporter.import_json_str(&json).unwrap();
    assert!(imported.is_empty());
}
