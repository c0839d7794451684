use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracelens_core::error::TraceLensError;
use tracing::warn;

use crate::session::Session;
use crate::watch::{Debouncer, FileEvent, FileEventKind};

/// What happened after a debounced event was applied to the session.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedEvent {
    pub event: FileEvent,
    pub traces: usize,
    pub error: Option<String>,
}

pub struct PipelineConfig {
    pub debounce: Duration,
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            channel_capacity: 256,
        }
    }
}

/// Debounces file events per path and applies the survivors to a session in arrival order.
///
/// Dropping the pipeline discards pending events and stops the worker.
pub struct Pipeline {
    debouncer: Debouncer<PathBuf, FileEventKind>,
    applied_tx: broadcast::Sender<AppliedEvent>,
}

impl Pipeline {
    pub fn new(session: Arc<Session>, cfg: PipelineConfig) -> Self {
        let (debouncer, rx) = Debouncer::new(cfg.debounce);
        let (applied_tx, _) = broadcast::channel(cfg.channel_capacity.max(1));
        tokio::spawn(run_event_worker(session, rx, applied_tx.clone()));
        Self {
            debouncer,
            applied_tx,
        }
    }

    /// A newer event for the same path restarts its delay and replaces the pending kind.
    pub fn submit(&self, event: FileEvent) {
        self.debouncer.trigger(event.path, event.kind);
    }

    pub fn pending(&self) -> usize {
        self.debouncer.pending()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppliedEvent> {
        self.applied_tx.subscribe()
    }
}

async fn run_event_worker(
    session: Arc<Session>,
    mut rx: mpsc::UnboundedReceiver<(PathBuf, FileEventKind)>,
    applied_tx: broadcast::Sender<AppliedEvent>,
) {
    while let Some((path, kind)) = rx.recv().await {
        let event = FileEvent::new(kind, path);
        // Parsing and restitching are CPU bound; keep them off the async workers.
        let result = tokio::task::spawn_blocking({
            let session = session.clone();
            let event = event.clone();
            move || session.apply_event(&event)
        })
        .await
        .unwrap_or_else(|e| Err(TraceLensError::Internal(format!("apply task failed: {e}"))));
        let applied = match result {
            Ok(traces) => AppliedEvent {
                event,
                traces: traces.len(),
                error: None,
            },
            Err(e) => {
                warn!(path = %event.path.display(), error = %e, "failed to apply file event");
                AppliedEvent {
                    traces: session.traces().len(),
                    event,
                    error: Some(e.to_string()),
                }
            }
        };
        // No subscribers is fine.
        let _ = applied_tx.send(applied);
    }
}
