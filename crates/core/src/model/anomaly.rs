use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    Duration,
    TraceDuration,
    Spike,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Duration => "Duration",
            Self::TraceDuration => "TraceDuration",
            Self::Spike => "Spike",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyResult {
    pub trace_id: String,
    pub span_id: String,
    pub kind: AnomalyKind,
    pub description: String,
    /// Always within `[0, 1]`.
    pub severity: f64,
    pub expected_ms: Option<f64>,
    pub actual_ms: Option<f64>,
}

#[derive(Debug, Default)]
struct Published {
    generation: u64,
    ids: Arc<HashSet<String>>,
}

/// Shared handle to the set of currently anomalous trace ids.
///
/// Writers swap in a whole new set; readers take a cheap `Arc` snapshot and never observe a
/// half-built set.
#[derive(Debug, Clone, Default)]
pub struct AnomalySet {
    inner: Arc<RwLock<Published>>,
}

impl AnomalySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = Self::new();
        set.replace(ids.into_iter().map(Into::into).collect());
        set
    }

    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .clone()
    }

    pub fn contains(&self, trace_id: &str) -> bool {
        self.snapshot().contains(trace_id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Publishes `ids` as the result of detection pass `generation`.
    ///
    /// Returns false (and keeps the current set) when a newer pass already published.
    pub fn publish(&self, generation: u64, ids: HashSet<String>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if generation < guard.generation {
            return false;
        }
        guard.generation = generation;
        guard.ids = Arc::new(ids);
        true
    }

    /// Unconditionally replaces the set, keeping the generation.
    pub fn replace(&self, ids: HashSet<String>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.ids = Arc::new(ids);
    }

    /// Adds ids to the current set (copy-on-write).
    pub fn extend<I>(&self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*guard.ids).clone();
        next.extend(ids);
        guard.ids = Arc::new(next);
    }

    pub fn clear(&self) {
        self.replace(HashSet::new());
    }
}
