use tracelens_core::filter::TraceFilter;
use tracelens_core::model::{AnomalySet, SpanStatus, Trace};
use tracelens_core::query::parse_query;
use tracing::debug;

/// Evaluates compiled filters against traces.
///
/// Holds a read-only handle to the anomalous-trace set published by the anomaly engine.
#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    anomalous: AnomalySet,
}

impl QueryEngine {
    pub fn new(anomalous: AnomalySet) -> Self {
        Self { anomalous }
    }

    pub fn set_anomalous_trace_ids(&mut self, anomalous: AnomalySet) {
        self.anomalous = anomalous;
    }

    pub fn anomalous_trace_ids(&self) -> &AnomalySet {
        &self.anomalous
    }

    pub fn parse_query(&self, text: &str) -> TraceFilter {
        parse_query(text)
    }

    /// Keeps the traces that satisfy every constraint, in input order.
    pub fn filter_traces(&self, traces: &[Trace], filter: &TraceFilter) -> Vec<Trace> {
        if filter.is_empty() {
            return traces.to_vec();
        }
        let out = traces
            .iter()
            .filter(|t| self.matches(t, filter))
            .cloned()
            .collect::<Vec<_>>();
        debug!(
            query = %filter.raw_query,
            input = traces.len(),
            matched = out.len(),
            "filtered traces"
        );
        out
    }

    pub fn matches(&self, trace: &Trace, filter: &TraceFilter) -> bool {
        let status = trace.status();
        if let Some(want) = filter.status
            && status != want
        {
            return false;
        }
        if filter.has_error && status != SpanStatus::Error {
            return false;
        }
        if filter.has_anomalies && !self.anomalous.contains(trace.trace_id()) {
            return false;
        }

        let total = trace.total_duration_ms();
        if let Some(min) = filter.min_duration_ms
            && total < min
        {
            return false;
        }
        if let Some(max) = filter.max_duration_ms
            && total > max
        {
            return false;
        }

        if let Some(needle) = &filter.name_contains {
            let needle = needle.to_lowercase();
            if !trace
                .all_spans()
                .iter()
                .any(|s| s.name.to_lowercase().contains(&needle))
            {
                return false;
            }
        }

        filter.tag_filters.iter().all(|(key, value)| {
            let value = value.to_lowercase();
            trace.all_spans().iter().any(|s| {
                s.tag(key)
                    .is_some_and(|v| v.to_lowercase().contains(&value))
            })
        })
    }
}
