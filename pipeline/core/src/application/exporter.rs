// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Result Exporter
//!
//! Writes an [`ExportBundle`] to any `io::Write` sink, one record at a time.
//! JSON output is field-complete and can be read back with
//! [`ResultExporter::import_json`]. Markdown and HTML are reports for people;
//! CSV is a flat dump of the code recommendations.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::info;
use uuid::Uuid;

use crate::domain::export::{ExportBundle, ExportError, ExportFormat, ExportMetadata, EXPORTER_VERSION};
use crate::domain::optimization::{OptimizationRecommendation, PatternAnalysis};
use crate::domain::profile::ExecutionProfile;
use crate::domain::recommendation::{CodeRecommendation, RecommendationType};
use crate::domain::result::EnhancedResult;

/// Shape of a JSON export. Written field by field by [`write_json`].
#[derive(Debug, Deserialize)]
struct ExportDocument {
    metadata: ExportMetadata,
    #[serde(default)]
    results: Vec<EnhancedResult>,
    #[serde(default)]
    profiles: Vec<ExecutionProfile>,
    #[serde(default)]
    patterns: Vec<PatternAnalysis>,
    #[serde(default)]
    optimizations: Vec<OptimizationRecommendation>,
    #[serde(default)]
    recommendations: Vec<CodeRecommendation>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultExporter;

impl ResultExporter {
    pub fn new() -> Self {
        Self
    }

    pub fn export<W: Write>(
        &self,
        bundle: &ExportBundle,
        format: ExportFormat,
        mut sink: W,
    ) -> Result<ExportMetadata, ExportError> {
        let record_count = match format {
            ExportFormat::Csv => bundle.recommendations.len(),
            _ => bundle.len(),
        };
        let metadata = ExportMetadata {
            export_id: Uuid::new_v4(),
            format,
            generated_at: Utc::now(),
            record_count,
            exporter_version: EXPORTER_VERSION.to_string(),
        };

        match format {
            ExportFormat::Json => write_json(bundle, &metadata, &mut sink)?,
            ExportFormat::Markdown => write_markdown(bundle, &metadata, &mut sink)?,
            ExportFormat::Csv => write_csv(bundle, &mut sink)?,
            ExportFormat::Html => write_html(bundle, &metadata, &mut sink)?,
        }
        sink.flush()?;

        info!(
            export_id = %metadata.export_id,
            format = %format,
            records = metadata.record_count,
            "Export written"
        );
        Ok(metadata)
    }

    pub fn export_to_string(
        &self,
        bundle: &ExportBundle,
        format: ExportFormat,
    ) -> Result<(String, ExportMetadata), ExportError> {
        let mut buffer = Vec::new();
        let metadata = self.export(bundle, format, &mut buffer)?;
        let artifact = String::from_utf8(buffer).map_err(|_| ExportError::Encoding)?;
        Ok((artifact, metadata))
    }

    /// Reads back a JSON export.
    pub fn import_json<R: Read>(&self, reader: R) -> Result<(ExportMetadata, ExportBundle), ExportError> {
        let document: ExportDocument = serde_json::from_reader(reader)?;
        let bundle = ExportBundle {
            results: document.results,
            profiles: document.profiles,
            patterns: document.patterns,
            optimizations: document.optimizations,
            recommendations: document.recommendations,
        };
        Ok((document.metadata, bundle))
    }

    pub fn import_json_str(&self, json: &str) -> Result<(ExportMetadata, ExportBundle), ExportError> {
        self.import_json(json.as_bytes())
    }
}

fn write_json_array<W: Write, T: Serialize>(
    sink: &mut W,
    name: &str,
    items: &[T],
    last: bool,
) -> Result<(), ExportError> {
    write!(sink, "  \"{name}\": [")?;
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            sink.write_all(b",")?;
        }
        sink.write_all(b"\n    ")?;
        serde_json::to_writer(&mut *sink, item)?;
    }
    if !items.is_empty() {
        sink.write_all(b"\n  ")?;
    }
    sink.write_all(b"]")?;
    if !last {
        sink.write_all(b",")?;
    }
    sink.write_all(b"\n")?;
    Ok(())
}

fn write_json<W: Write>(
    bundle: &ExportBundle,
    metadata: &ExportMetadata,
    sink: &mut W,
) -> Result<(), ExportError> {
    sink.write_all(b"{\n  \"metadata\": ")?;
    serde_json::to_writer(&mut *sink, metadata)?;
    sink.write_all(b",\n")?;
    write_json_array(sink, "results", &bundle.results, false)?;
    write_json_array(sink, "profiles", &bundle.profiles, false)?;
    write_json_array(sink, "patterns", &bundle.patterns, false)?;
    write_json_array(sink, "optimizations", &bundle.optimizations, false)?;
    write_json_array(sink, "recommendations", &bundle.recommendations, true)?;
    sink.write_all(b"}\n")?;
    Ok(())
}

fn by_type(
    bundle: &ExportBundle,
    kind: RecommendationType,
) -> impl Iterator<Item = &CodeRecommendation> {
    bundle
        .recommendations
        .iter()
        .filter(move |r| r.recommendation_type == kind)
}

fn write_markdown<W: Write>(
    bundle: &ExportBundle,
    metadata: &ExportMetadata,
    sink: &mut W,
) -> Result<(), ExportError> {
    writeln!(sink, "# Execution Report")?;
    writeln!(sink)?;
    writeln!(sink, "- Export: `{}`", metadata.export_id)?;
    writeln!(sink, "- Generated: {}", metadata.generated_at.to_rfc3339())?;
    writeln!(sink, "- Records: {}", metadata.record_count)?;
    writeln!(sink)?;

    writeln!(sink, "## Results")?;
    writeln!(sink)?;
    if bundle.results.is_empty() {
        writeln!(sink, "_No results._")?;
    } else {
        writeln!(sink, "| Fingerprint | Category | Complexity | Duration (ms) | Summary |")?;
        writeln!(sink, "|---|---|---|---|---|")?;
        for result in &bundle.results {
            writeln!(
                sink,
                "| `{}` | {} | {} | {:.0} | {} |",
                result.fingerprint.short(),
                result.category,
                result.complexity,
                result.duration_ms(),
                md_cell(&result.summary)
            )?;
        }
    }
    writeln!(sink)?;

    writeln!(sink, "## Recommendations")?;
    for kind in RecommendationType::BY_SEVERITY {
        writeln!(sink)?;
        writeln!(sink, "### {}", kind.title())?;
        writeln!(sink)?;
        let mut any = false;
        for rec in by_type(bundle, kind) {
            any = true;
            writeln!(
                sink,
                "- **{}** ({:.0}% confidence, `{}`): {}",
                rec.topic,
                rec.confidence * 100.0,
                rec.fingerprint.short(),
                rec.text
            )?;
        }
        if !any {
            writeln!(sink, "_None._")?;
        }
    }
    writeln!(sink)?;

    if !bundle.optimizations.is_empty() {
        writeln!(sink, "## Optimizations")?;
        writeln!(sink)?;
        for opt in &bundle.optimizations {
            writeln!(
                sink,
                "- **{}** ({:.0}% confidence): {}. {}",
                opt.strategy,
                opt.confidence * 100.0,
                opt.rationale,
                opt.expected_benefit
            )?;
        }
        writeln!(sink)?;
    }

    if !bundle.patterns.is_empty() {
        writeln!(sink, "## Patterns")?;
        writeln!(sink)?;
        writeln!(sink, "| Id | Kind | Frequency | First seen |")?;
        writeln!(sink, "|---|---|---|---|")?;
        for pattern in &bundle.patterns {
            writeln!(
                sink,
                "| `{}` | {} | {} | {} |",
                pattern.id,
                pattern.kind,
                pattern.frequency,
                pattern.first_seen.to_rfc3339()
            )?;
        }
        writeln!(sink)?;
    }

    if !bundle.profiles.is_empty() {
        writeln!(sink, "## Profiles")?;
        writeln!(sink)?;
        writeln!(sink, "| Complexity | Samples | Mean (ms) | p95 (ms) | p99 (ms) |")?;
        writeln!(sink, "|---|---|---|---|---|")?;
        for profile in &bundle.profiles {
            writeln!(
                sink,
                "| {} | {} | {:.1} | {:.1} | {:.1} |",
                profile.complexity, profile.sample_count, profile.mean_ms, profile.p95_ms, profile.p99_ms
            )?;
        }
        writeln!(sink)?;
    }
    Ok(())
}

fn md_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn write_csv<W: Write>(bundle: &ExportBundle, sink: &mut W) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(["fingerprint", "type", "confidence", "text"])?;
    for rec in &bundle.recommendations {
        let confidence = format!("{:.4}", rec.confidence);
        writer.write_record([
            rec.fingerprint.as_str(),
            rec.recommendation_type.as_str(),
            confidence.as_str(),
            rec.text.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn write_html<W: Write>(
    bundle: &ExportBundle,
    metadata: &ExportMetadata,
    sink: &mut W,
) -> Result<(), ExportError> {
    writeln!(sink, "<!DOCTYPE html>")?;
    writeln!(sink, "<html><head><meta charset=\"utf-8\"><title>Execution Report</title></head><body>")?;
    writeln!(sink, "<h1>Execution Report</h1>")?;
    writeln!(
        sink,
        "<p>Export <code>{}</code> generated {} with {} records.</p>",
        metadata.export_id,
        metadata.generated_at.to_rfc3339(),
        metadata.record_count
    )?;

    writeln!(sink, "<h2>Results</h2>")?;
    writeln!(sink, "<table><tr><th>Fingerprint</th><th>Category</th><th>Complexity</th><th>Duration (ms)</th><th>Summary</th></tr>")?;
    for result in &bundle.results {
        writeln!(
            sink,
            "<tr><td><code>{}</code></td><td>{}</td><td>{}</td><td>{:.0}</td><td>{}</td></tr>",
            result.fingerprint.short(),
            result.category,
            result.complexity,
            result.duration_ms(),
            escape_html(&result.summary)
        )?;
    }
    writeln!(sink, "</table>")?;

    writeln!(sink, "<h2>Recommendations</h2>")?;
    for kind in RecommendationType::BY_SEVERITY {
        let mut recs = by_type(bundle, kind).peekable();
        if recs.peek().is_none() {
            continue;
        }
        writeln!(sink, "<h3>{}</h3>", kind.title())?;
        writeln!(sink, "<ul>")?;
        for rec in recs {
            writeln!(
                sink,
                "<li><strong>{}</strong> ({:.0}% confidence, <code>{}</code>): {}</li>",
                escape_html(&rec.topic),
                rec.confidence * 100.0,
                rec.fingerprint.short(),
                escape_html(&rec.text)
            )?;
        }
        writeln!(sink, "</ul>")?;
    }

    if !bundle.optimizations.is_empty() {
        writeln!(sink, "<h2>Optimizations</h2>")?;
        writeln!(sink, "<ul>")?;
        for opt in &bundle.optimizations {
            writeln!(
                sink,
                "<li><strong>{}</strong> ({:.0}% confidence): {}</li>",
                opt.strategy,
                opt.confidence * 100.0,
                escape_html(&opt.rationale)
            )?;
        }
        writeln!(sink, "</ul>")?;
    }

    if !bundle.profiles.is_empty() {
        writeln!(sink, "<h2>Profiles</h2>")?;
        writeln!(sink, "<table><tr><th>Complexity</th><th>Samples</th><th>Mean (ms)</th><th>p95 (ms)</th></tr>")?;
        for profile in &bundle.profiles {
            writeln!(
                sink,
                "<tr><td>{}</td><td>{}</td><td>{:.1}</td><td>{:.1}</td></tr>",
                profile.complexity, profile.sample_count, profile.mean_ms, profile.p95_ms
            )?;
        }
        writeln!(sink, "</table>")?;
    }
    writeln!(sink, "</body></html>")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recommendation::{Effort, Provenance};
    use crate::domain::result::Fingerprint;
    use chrono::TimeZone;

    fn recommendation(kind: RecommendationType, topic: &str, text: &str) -> CodeRecommendation {
        CodeRecommendation {
            recommendation_type: kind,
            topic: topic.to_string(),
            text: text.to_string(),
            confidence: 0.8,
            fingerprint: Fingerprint::new("abcdef0123456789"),
            provenance: vec![Provenance::StaticScan {
                rule: topic.to_string(),
            }],
            detected_at: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
            expected_savings_ms: None,
            effort: Effort::Low,
        }
    }

    fn bundle() -> ExportBundle {
        ExportBundle {
            recommendations: vec![
                recommendation(RecommendationType::Style, "warnings", "Address the warnings"),
                recommendation(RecommendationType::Security, "eval", "Avoid eval(), it runs <input>"),
            ],
            ..ExportBundle::default()
        }
    }

    #[test]
    fn test_json_round_trip() {
        let exporter = ResultExporter::new();
        let original = bundle();
        let (json, metadata) = exporter.export_to_string(&original, ExportFormat::Json).unwrap();
        assert_eq!(metadata.record_count, 2);

        let (imported_metadata, imported) = exporter.import_json_str(&json).unwrap();
        assert_eq!(imported, original);
        assert_eq!(imported_metadata, metadata);
    }

    #[test]
    fn test_empty_bundle_is_valid_json() {
        let exporter = ResultExporter::new();
        let (json, metadata) = exporter
            .export_to_string(&ExportBundle::default(), ExportFormat::Json)
            .unwrap();
        assert_eq!(metadata.record_count, 0);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["results"], serde_json::json!([]));
    }

    #[test]
    fn test_markdown_sections_follow_severity() {
        let (markdown, _) = ResultExporter::new()
            .export_to_string(&bundle(), ExportFormat::Markdown)
            .unwrap();
        let security = markdown.find("### Security").unwrap();
        let correctness = markdown.find("### Correctness").unwrap();
        let style = markdown.find("### Style").unwrap();
        assert!(security < correctness && correctness < style);
        assert!(markdown.contains("- **eval**"));
    }

    #[test]
    fn test_csv_columns_and_quoting() {
        let mut original = bundle();
        original.recommendations[0].text = "first, with \"quotes\"".to_string();
        let (csv_text, metadata) = ResultExporter::new()
            .export_to_string(&original, ExportFormat::Csv)
            .unwrap();
        assert_eq!(metadata.record_count, 2);

        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers, vec!["fingerprint", "type", "confidence", "text"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "style");
        assert_eq!(&rows[0][3], "first, with \"quotes\"");
    }

    #[test]
    fn test_html_escapes_text() {
        let (html, _) = ResultExporter::new()
            .export_to_string(&bundle(), ExportFormat::Html)
            .unwrap();
        assert!(html.contains("&lt;input&gt;"));
        assert!(!html.contains("<input>"));
    }
}
