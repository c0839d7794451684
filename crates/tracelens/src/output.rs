use std::collections::HashSet;
use std::io::IsTerminal;

use chrono::{DateTime, SecondsFormat, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracelens_core::model::{AnomalyResult, Span, SpanStatus, Trace};
use tracelens_ingest::LoadReport;

#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub root_name: String,
    pub status: SpanStatus,
    pub duration_ms: f64,
    pub span_count: usize,
    pub error_count: usize,
    pub start: DateTime<Utc>,
    pub anomalous: bool,
}

impl TraceSummary {
    pub fn new(trace: &Trace, anomalous: &HashSet<String>) -> Self {
        Self {
            trace_id: trace.trace_id().to_string(),
            root_name: trace.entry_point().to_string(),
            status: trace.status(),
            duration_ms: trace.total_duration_ms(),
            span_count: trace.span_count(),
            error_count: trace.error_count(),
            start: trace.root_span().timestamp,
            anomalous: anomalous.contains(trace.trace_id()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanNode<'a> {
    pub depth: usize,
    #[serde(flatten)]
    pub span: &'a Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceDetail<'a> {
    #[serde(flatten)]
    pub summary: TraceSummary,
    pub root_is_fallback: bool,
    pub source_files: Vec<&'a str>,
    pub spans: Vec<SpanNode<'a>>,
}

impl<'a> TraceDetail<'a> {
    pub fn new(trace: &'a Trace, anomalous: &HashSet<String>) -> Self {
        Self {
            summary: TraceSummary::new(trace, anomalous),
            root_is_fallback: trace.root_is_fallback(),
            source_files: trace.source_files(),
            spans: trace
                .walk()
                .into_iter()
                .map(|(depth, span)| SpanNode { depth, span })
                .collect(),
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_traces_human(summaries: &[TraceSummary], total: usize) {
    for item in summaries {
        let marker = if item.anomalous {
            paint(" anomaly", |s| s.yellow().to_string())
        } else {
            String::new()
        };
        println!(
            "{} trace={} duration={:.1}ms spans={} errors={} status={} root=\"{}\"{marker}",
            ts(&item.start),
            item.trace_id,
            item.duration_ms,
            item.span_count,
            item.error_count,
            status_label(item.status),
            item.root_name,
        );
    }
    println!("-- {} traces ({total} matched) --", summaries.len());
}

pub fn print_trace_human(detail: &TraceDetail<'_>) {
    let s = &detail.summary;
    println!(
        "TRACE {} duration={:.1}ms spans={} errors={} status={}",
        s.trace_id,
        s.duration_ms,
        s.span_count,
        s.error_count,
        status_label(s.status)
    );
    if detail.root_is_fallback {
        println!("root elected by earliest timestamp (no parentless span found)");
    }
    println!("files={}", detail.source_files.join(","));

    for node in &detail.spans {
        let indent = "  ".repeat(node.depth);
        let span = node.span;
        println!(
            "{indent}{} ({:.1}ms) {} span={}",
            span.name,
            span.duration_ms(),
            status_label(span.status),
            span.span_id
        );
        for (key, value) in &span.tags {
            println!("{indent}    {key}={value}");
        }
        for event in &span.events {
            println!("{indent}    @{} {}", ts(&event.timestamp), event.name);
            for (key, value) in &event.attributes {
                println!("{indent}      {key}={}", value.replace('\n', " / "));
            }
        }
    }
}

pub fn print_anomalies_human(results: &[AnomalyResult]) {
    for r in results {
        let expected = r
            .expected_ms
            .map(|v| format!("{v:.1}ms"))
            .unwrap_or_else(|| "-".to_string());
        let actual = r
            .actual_ms
            .map(|v| format!("{v:.1}ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} severity={:.2} trace={} span={} expected={expected} actual={actual} | {}",
            paint(&r.kind.to_string(), |s| s.magenta().to_string()),
            r.severity,
            r.trace_id,
            r.span_id,
            r.description
        );
    }
    println!("-- {} anomalies --", results.len());
}

pub fn print_load_report(report: &LoadReport) {
    for path in &report.unsupported {
        eprintln!("skipped unsupported file {}", path.display());
    }
    for (path, error) in &report.failures {
        eprintln!("failed to load {}: {error}", path.display());
    }
}

fn status_label(status: SpanStatus) -> String {
    let label = status.to_string();
    match status {
        SpanStatus::Ok => paint(&label, |s| s.green().to_string()),
        SpanStatus::Error => paint(&label, |s| s.red().to_string()),
        SpanStatus::Unset => paint(&label, |s| s.bright_black().to_string()),
    }
}

fn paint(text: &str, color: impl Fn(&str) -> String) -> String {
    if std::io::stdout().is_terminal() {
        color(text)
    } else {
        text.to_string()
    }
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
