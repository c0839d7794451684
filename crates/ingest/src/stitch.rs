use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracelens_core::error::Result;
use tracelens_core::model::{Span, Trace, TraceFile};
use tracing::{debug, warn};

use crate::parser::ParserRegistry;

/// Parses files and groups their spans into traces.
#[derive(Default)]
pub struct TraceStitcher {
    registry: ParserRegistry,
}

impl TraceStitcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<TraceFile> {
        self.registry.parse_file(path)
    }

    pub fn stitch(&self, files: &[TraceFile]) -> Vec<Trace> {
        stitch_spans(files.iter().flat_map(|f| f.spans.iter().cloned()))
    }

    /// Drops the cached parser instances.
    pub fn clear(&mut self) {
        self.registry.clear();
    }
}

/// Groups spans by trace id, elects a root per group, and orders traces newest root first.
pub fn stitch_spans<I>(spans: I) -> Vec<Trace>
where
    I: IntoIterator<Item = Span>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Span>)> = Vec::new();
    for span in spans {
        match index.get(&span.trace_id) {
            Some(&slot) => groups[slot].1.push(span),
            None => {
                index.insert(span.trace_id.clone(), groups.len());
                groups.push((span.trace_id.clone(), vec![span]));
            }
        }
    }

    let mut traces = groups
        .into_iter()
        .filter_map(|(trace_id, spans)| {
            let (root_index, fallback) = elect_root(&trace_id, &spans);
            Trace::new(trace_id, spans, root_index, fallback)
        })
        .collect::<Vec<_>>();

    traces.sort_by(|a, b| {
        Reverse(a.root_span().timestamp)
            .cmp(&Reverse(b.root_span().timestamp))
            .then_with(|| a.trace_id().cmp(b.trace_id()))
    });
    debug!(traces = traces.len(), "stitched traces");
    traces
}

/// Returns the root index and whether the earliest-span fallback was needed.
fn elect_root(trace_id: &str, spans: &[Span]) -> (usize, bool) {
    if let Some(idx) = spans.iter().position(Span::is_root) {
        return (idx, false);
    }

    let known: HashSet<&str> = spans.iter().map(|s| s.span_id.as_str()).collect();
    if let Some(idx) = spans
        .iter()
        .position(|s| !known.contains(s.parent_id.as_str()))
    {
        return (idx, false);
    }

    let idx = spans
        .iter()
        .enumerate()
        .min_by_key(|(_, s)| s.timestamp)
        .map(|(i, _)| i)
        .unwrap_or(0);
    warn!(
        trace_id,
        span_id = spans.get(idx).map(|s| s.span_id.as_str()).unwrap_or_default(),
        "no root span found, using earliest span"
    );
    (idx, true)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tracelens_core::model::{FileType, SpanStatus};
    use testkit::{at_offset_ms, span, with_status};

    use super::*;

    fn file(name: &str, spans: Vec<Span>) -> TraceFile {
        TraceFile {
            file_path: PathBuf::from(name),
            file_type: FileType::Log,
            spans,
        }
    }

    #[test]
    fn elects_explicit_root() {
        let traces = stitch_spans(vec![
            span("t", "c", "r", "child", 10),
            span("t", "r", "", "root", 50),
        ]);
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].root_span().span_id, "r");
        assert!(!traces[0].root_is_fallback());
    }

    #[test]
    fn elects_span_pointing_outside_trace() {
        let traces = stitch_spans(vec![
            span("t", "c", "p", "child", 10),
            span("t", "p", "upstream", "partial-root", 50),
        ]);
        assert_eq!(traces[0].root_span().span_id, "p");
    }

    #[test]
    fn falls_back_to_earliest_in_cycles() {
        let traces = stitch_spans(vec![
            at_offset_ms(span("t", "a", "b", "a", 10), 20),
            at_offset_ms(span("t", "b", "a", "b", 10), 5),
        ]);
        assert_eq!(traces[0].root_span().span_id, "b");
        assert!(traces[0].root_is_fallback());
    }

    #[test]
    fn merges_across_files_and_orders_newest_first() {
        let stitcher = TraceStitcher::new();
        let files = vec![
            file("a.log", vec![at_offset_ms(span("old", "r", "", "old", 5), 0)]),
            file(
                "b.jsonl",
                vec![
                    at_offset_ms(span("new", "r", "", "new", 5), 1000),
                    span("old", "c", "r", "old-child", 1),
                ],
            ),
        ];
        let traces = stitcher.stitch(&files);
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].trace_id(), "new");
        assert_eq!(traces[1].trace_id(), "old");
        assert_eq!(traces[1].span_count(), 2);
    }

    #[test]
    fn stitching_is_order_independent() {
        let a = file(
            "a.log",
            vec![
                span("t1", "r", "", "root", 10),
                with_status(span("t2", "x", "", "x", 10), SpanStatus::Error),
            ],
        );
        let b = file("b.log", vec![span("t1", "c", "r", "child", 3)]);

        let summarize = |files: Vec<TraceFile>| {
            let mut out = TraceStitcher::new()
                .stitch(&files)
                .into_iter()
                .map(|t| {
                    let mut ids: Vec<String> =
                        t.all_spans().iter().map(|s| s.span_id.clone()).collect();
                    ids.sort();
                    (t.trace_id().to_string(), ids)
                })
                .collect::<Vec<_>>();
            out.sort();
            out
        };

        assert_eq!(summarize(vec![a.clone(), b.clone()]), summarize(vec![b, a]));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(TraceStitcher::new().stitch(&[]).is_empty());
    }
}
