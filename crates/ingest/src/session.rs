use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracelens_anomaly::{AnomalyEngine, DetectionHandle};
use tracelens_core::config::AnomalyConfig;
use tracelens_core::error::{Result, TraceLensError};
use tracelens_core::filter::TraceFilter;
use tracelens_core::model::{AnomalyResult, Trace, TraceFile};
use tracelens_core::query::parse_query;
use tracelens_store::{QueryEngine, Store};
use tracing::{debug, info, warn};

use crate::stitch::TraceStitcher;
use crate::watch::{FileEvent, FileEventKind};

/// Outcome of loading a batch of paths. A bad file never fails the batch.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<PathBuf>,
    pub spans: usize,
    pub unsupported: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

impl LoadReport {
    /// Nothing usable was loaded.
    pub fn is_nothing_to_do(&self) -> bool {
        self.loaded.is_empty()
    }
}

/// Everything a presentation layer drives: loading, stitching, querying, detection.
pub struct Session {
    store: Store,
    stitcher: Mutex<TraceStitcher>,
    engine: Arc<AnomalyEngine>,
    query: QueryEngine,
    detection: Mutex<Option<DetectionHandle>>,
}

impl Session {
    pub fn new(config: AnomalyConfig) -> Self {
        let engine = Arc::new(AnomalyEngine::new(config));
        let query = QueryEngine::new(engine.anomaly_set());
        Self {
            store: Store::new(),
            stitcher: Mutex::new(TraceStitcher::new()),
            engine,
            query,
            detection: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn engine(&self) -> &Arc<AnomalyEngine> {
        &self.engine
    }

    fn stitcher(&self) -> MutexGuard<'_, TraceStitcher> {
        self.stitcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detection(&self) -> MutexGuard<'_, Option<DetectionHandle>> {
        self.detection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parses one file and replaces any previous parse of the same path.
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let file = self.stitcher().parse_file(path)?;
        let spans = file.spans.len();
        self.store.upsert_file(file);
        Ok(spans)
    }

    pub fn load_files<P: AsRef<Path>>(&self, paths: &[P]) -> LoadReport {
        let mut report = LoadReport::default();
        for path in paths {
            let path = path.as_ref();
            match self.load_file(path) {
                Ok(spans) => {
                    debug!(path = %path.display(), spans, "loaded file");
                    report.spans += spans;
                    report.loaded.push(path.to_path_buf());
                }
                Err(TraceLensError::UnsupportedFile(_)) => {
                    warn!(path = %path.display(), "skipping unsupported file");
                    report.unsupported.push(path.to_path_buf());
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load file");
                    report.failures.push((path.to_path_buf(), e.to_string()));
                }
            }
        }
        info!(
            loaded = report.loaded.len(),
            spans = report.spans,
            unsupported = report.unsupported.len(),
            failed = report.failures.len(),
            "load finished"
        );
        report
    }

    pub fn files(&self) -> Vec<TraceFile> {
        self.store.files()
    }

    /// Rebuilds every trace from the loaded files.
    pub fn stitch(&self) -> Arc<Vec<Trace>> {
        let files = self.store.files();
        let traces = self.stitcher().stitch(&files);
        self.store.replace_traces(traces)
    }

    pub fn traces(&self) -> Arc<Vec<Trace>> {
        self.store.traces()
    }

    pub fn trace(&self, trace_id: &str) -> Option<Trace> {
        self.store.trace(trace_id)
    }

    pub fn query(&self, text: &str) -> Vec<Trace> {
        self.filter(&parse_query(text))
    }

    pub fn filter(&self, filter: &TraceFilter) -> Vec<Trace> {
        self.query.filter_traces(&self.store.traces(), filter)
    }

    /// Runs a full pass on the calling thread.
    pub fn detect_anomalies(&self, cancel: &CancellationToken) -> Result<Vec<AnomalyResult>> {
        self.engine.detect_anomalies(&self.store.traces(), cancel)
    }

    pub fn detect_anomalies_with(
        &self,
        config: &AnomalyConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyResult>> {
        self.engine
            .detect_anomalies_with(&self.store.traces(), config, cancel)
    }

    /// Launches a background pass over the current traces, cancelling any pass still running.
    pub fn start_detection(&self) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TraceLensError::Internal(
                "background detection needs a tokio runtime".to_string(),
            ));
        }
        let handle = self.engine.spawn_detection(self.store.traces());
        if let Some(previous) = self.detection().replace(handle) {
            previous.cancel();
        }
        Ok(())
    }

    /// Waits for the latest background pass, if one was started.
    pub async fn wait_for_detection(&self) -> Option<Result<Vec<AnomalyResult>>> {
        let handle = self.detection().take()?;
        Some(handle.join().await)
    }

    pub fn anomalous_trace_ids(&self) -> Arc<HashSet<String>> {
        self.engine.anomalous_trace_ids()
    }

    /// Reacts to a watcher notification: reparse or drop the file, restitch, relaunch detection.
    pub fn apply_event(&self, event: &FileEvent) -> Result<Arc<Vec<Trace>>> {
        match event.kind {
            FileEventKind::Created | FileEventKind::Changed => {
                let spans = self.load_file(&event.path)?;
                debug!(path = %event.path.display(), spans, kind = ?event.kind, "reloaded file");
            }
            FileEventKind::Deleted => {
                if self.store.remove_file(&event.path).is_none() {
                    debug!(path = %event.path.display(), "delete for unknown file");
                }
            }
        }
        let traces = self.stitch();
        self.start_detection()?;
        Ok(traces)
    }

    pub fn clear(&self) {
        if let Some(handle) = self.detection().take() {
            handle.cancel();
        }
        self.store.clear();
        self.stitcher().clear();
        self.engine.anomaly_set().clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(AnomalyConfig::default())
    }
}
