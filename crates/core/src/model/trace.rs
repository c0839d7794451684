use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::span::{Span, SpanStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FileType {
    Log,
    Jsonl,
}

impl FileType {
    /// Maps a case-insensitive file extension to its format; `None` means unsupported.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "log" => Some(Self::Log),
            "jsonl" => Some(Self::Jsonl),
            _ => None,
        }
    }
}

/// The parse result of one file on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceFile {
    pub file_path: PathBuf,
    pub file_type: FileType,
    pub spans: Vec<Span>,
}

/// All spans sharing a trace id, rooted at one elected span.
///
/// Built once per stitch pass and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    trace_id: String,
    root_index: usize,
    root_is_fallback: bool,
    spans: Vec<Span>,
}

impl Trace {
    /// `None` for an empty group. `root_index` is clamped into `spans`.
    pub fn new(
        trace_id: String,
        spans: Vec<Span>,
        root_index: usize,
        root_is_fallback: bool,
    ) -> Option<Self> {
        if spans.is_empty() {
            return None;
        }
        let root_index = root_index.min(spans.len() - 1);
        Some(Self {
            trace_id,
            root_index,
            root_is_fallback,
            spans,
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn root_span(&self) -> &Span {
        &self.spans[self.root_index]
    }

    pub fn all_spans(&self) -> &[Span] {
        &self.spans
    }

    /// True when no span qualified as root and the earliest span was used instead.
    pub fn root_is_fallback(&self) -> bool {
        self.root_is_fallback
    }

    pub fn total_duration(&self) -> Duration {
        self.root_span().duration
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.root_span().duration_ms()
    }

    pub fn status(&self) -> SpanStatus {
        if self.spans.iter().any(|s| s.status == SpanStatus::Error) {
            SpanStatus::Error
        } else if self.spans.iter().all(|s| s.status == SpanStatus::Ok) {
            SpanStatus::Ok
        } else {
            SpanStatus::Unset
        }
    }

    pub fn entry_point(&self) -> &str {
        &self.root_span().name
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn error_count(&self) -> usize {
        self.spans
            .iter()
            .filter(|s| s.status == SpanStatus::Error)
            .count()
    }

    /// Distinct origin files of the member spans, sorted.
    pub fn source_files(&self) -> Vec<&str> {
        self.spans
            .iter()
            .map(|s| s.source_file.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Direct children of `parent`; not recursive.
    pub fn children(&self, parent: &Span) -> Vec<&Span> {
        self.spans
            .iter()
            .filter(|s| s.parent_id == parent.span_id)
            .collect()
    }

    /// Depth-first flattening of the hierarchy as `(depth, span)` pairs.
    ///
    /// Starts at the root; spans unreachable from it (orphans, members of a parent cycle) follow
    /// as extra top-level entries. Every span is emitted exactly once.
    pub fn walk(&self) -> Vec<(usize, &Span)> {
        let mut by_parent: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, span) in self.spans.iter().enumerate() {
            by_parent.entry(span.parent_id.as_str()).or_default().push(idx);
        }

        let mut visited = HashSet::with_capacity(self.spans.len());
        let mut out = Vec::with_capacity(self.spans.len());
        let starts = std::iter::once(self.root_index).chain(0..self.spans.len());
        for start in starts {
            if visited.contains(&start) {
                continue;
            }
            let mut stack = vec![(start, 0usize)];
            while let Some((idx, depth)) = stack.pop() {
                if !visited.insert(idx) {
                    continue;
                }
                let span = &self.spans[idx];
                out.push((depth, span));
                if let Some(kids) = by_parent.get(span.span_id.as_str()) {
                    for &kid in kids.iter().rev() {
                        if !visited.contains(&kid) {
                            stack.push((kid, depth + 1));
                        }
                    }
                }
            }
        }
        out
    }
}
