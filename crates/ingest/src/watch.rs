use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Created,
    Changed,
    Deleted,
}

/// A change notification for one span file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

struct Pending {
    ticket: u64,
    task: JoinHandle<()>,
}

/// Per-key timer: each `trigger` restarts the key's delay, and the latest value is emitted
/// exactly once after the key has been quiet for the whole delay.
///
/// Must be used from within a tokio runtime.
pub struct Debouncer<K, V> {
    delay: Duration,
    pending: Arc<Mutex<HashMap<K, Pending>>>,
    next_ticket: AtomicU64,
    tx: mpsc::UnboundedSender<(K, V)>,
}

impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<(K, V)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                delay,
                pending: Arc::new(Mutex::new(HashMap::new())),
                next_ticket: AtomicU64::new(0),
                tx,
            },
            rx,
        )
    }

    pub fn trigger(&self, key: K, value: V) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.remove(&key) {
            previous.task.abort();
        }

        let delay = self.delay;
        let map = self.pending.clone();
        let tx = self.tx.clone();
        let task_key = key.clone();
        // The lock is held until the entry is inserted, so the timer cannot observe a stale map.
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut pending = map.lock().unwrap_or_else(PoisonError::into_inner);
            let current = pending.get(&task_key).map(|p| p.ticket);
            if current == Some(ticket) {
                pending.remove(&task_key);
                drop(pending);
                let _ = tx.send((task_key, value));
            }
        });
        pending.insert(key, Pending { ticket, task });
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops every pending timer without emitting.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, p) in pending.drain() {
            p.task.abort();
        }
    }
}

impl<K, V> Drop for Debouncer<K, V> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, p) in pending.drain() {
            p.task.abort();
        }
    }
}
