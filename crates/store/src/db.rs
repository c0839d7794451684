use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracelens_core::model::{Trace, TraceFile};
use tracing::debug;

#[derive(Default)]
struct State {
    files: BTreeMap<PathBuf, TraceFile>,
    traces: Arc<Vec<Trace>>,
}

/// Session state: parsed files keyed by path and the latest stitched traces.
///
/// Cloning shares the same state.
#[derive(Clone, Default)]
pub struct Store {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoreStatus {
    pub files: usize,
    pub spans: usize,
    pub traces: usize,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the file at its path. Returns true when it replaced one.
    pub fn upsert_file(&self, file: TraceFile) -> bool {
        let path = file.file_path.clone();
        let replaced = self.state().files.insert(path.clone(), file).is_some();
        debug!(path = %path.display(), replaced, "stored trace file");
        replaced
    }

    pub fn remove_file(&self, path: &Path) -> Option<TraceFile> {
        self.state().files.remove(path)
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.state().files.contains_key(path)
    }

    /// Files in path order.
    pub fn files(&self) -> Vec<TraceFile> {
        self.state().files.values().cloned().collect()
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.state().files.keys().cloned().collect()
    }

    pub fn replace_traces(&self, traces: Vec<Trace>) -> Arc<Vec<Trace>> {
        let traces = Arc::new(traces);
        self.state().traces = traces.clone();
        traces
    }

    pub fn traces(&self) -> Arc<Vec<Trace>> {
        self.state().traces.clone()
    }

    pub fn trace(&self, trace_id: &str) -> Option<Trace> {
        self.state()
            .traces
            .iter()
            .find(|t| t.trace_id() == trace_id)
            .cloned()
    }

    pub fn status(&self) -> StoreStatus {
        let state = self.state();
        StoreStatus {
            files: state.files.len(),
            spans: state.files.values().map(|f| f.spans.len()).sum(),
            traces: state.traces.len(),
        }
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.files.clear();
        state.traces = Arc::new(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use tracelens_core::model::{FileType, SpanStatus};
    use testkit::{single_span_trace, span};

    use super::*;

    fn file(path: &str, span_count: usize) -> TraceFile {
        TraceFile {
            file_path: PathBuf::from(path),
            file_type: FileType::Log,
            spans: (0..span_count)
                .map(|i| span("t", &format!("s{i}"), "", "op", 1))
                .collect(),
        }
    }

    #[test]
    fn upsert_replaces_by_path() {
        let store = Store::new();
        assert!(!store.upsert_file(file("/tmp/a.log", 1)));
        assert!(store.upsert_file(file("/tmp/a.log", 3)));
        store.upsert_file(file("/tmp/b.log", 2));

        assert_eq!(
            store.status(),
            StoreStatus {
                files: 2,
                spans: 5,
                traces: 0
            }
        );
        assert_eq!(
            store.file_paths(),
            vec![PathBuf::from("/tmp/a.log"), PathBuf::from("/tmp/b.log")]
        );
    }

    #[test]
    fn remove_and_clear() {
        let store = Store::new();
        store.upsert_file(file("/tmp/a.log", 1));
        store.replace_traces(vec![single_span_trace("t", "op", SpanStatus::Ok, 5)]);

        assert!(store.remove_file(Path::new("/tmp/a.log")).is_some());
        assert!(store.remove_file(Path::new("/tmp/a.log")).is_none());
        assert!(store.trace("t").is_some());

        store.clear();
        assert_eq!(store.status().traces, 0);
        assert!(store.files().is_empty());
    }

    #[test]
    fn trace_snapshots_survive_replacement() {
        let store = Store::new();
        let first = store.replace_traces(vec![single_span_trace("a", "op", SpanStatus::Ok, 5)]);
        store.replace_traces(Vec::new());
        assert_eq!(first.len(), 1);
        assert!(store.traces().is_empty());
    }
}
