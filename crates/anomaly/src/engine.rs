use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracelens_core::config::AnomalyConfig;
use tracelens_core::error::{Result, TraceLensError};
use tracelens_core::model::{AnomalyKind, AnomalyResult, AnomalySet, Span, Trace};
use tracing::{debug, info, warn};

use crate::spike::{SpikeDetector, SpikeError, SpikePoint};
use crate::stats::{Summary, ZScoreDetector};

type SpikeOutcome = std::result::Result<(SpikeDetector, Vec<SpikePoint>), SpikeError>;

/// Runs detection passes and owns the published anomalous-trace-id set.
pub struct AnomalyEngine {
    config: AnomalyConfig,
    published: AnomalySet,
    generation: AtomicU64,
}

impl AnomalyEngine {
    pub fn new(config: AnomalyConfig) -> Self {
        Self::with_set(config, AnomalySet::new())
    }

    /// Publishes into an existing handle, typically one the query side already reads.
    pub fn with_set(config: AnomalyConfig, published: AnomalySet) -> Self {
        Self {
            config,
            published,
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    pub fn anomaly_set(&self) -> AnomalySet {
        self.published.clone()
    }

    pub fn anomalous_trace_ids(&self) -> Arc<HashSet<String>> {
        self.published.snapshot()
    }

    pub fn detect_anomalies(
        &self,
        traces: &[Trace],
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyResult>> {
        self.detect_anomalies_with(traces, &self.config, cancel)
    }

    /// Full recomputation: span-name groups plus trace totals, published as a fresh id set.
    ///
    /// On cancellation nothing is published and the previous set stays visible.
    pub fn detect_anomalies_with(
        &self,
        traces: &[Trace],
        config: &AnomalyConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyResult>> {
        self.full_pass(traces, config, cancel, run_spikes)
    }

    fn full_pass<F>(
        &self,
        traces: &[Trace],
        config: &AnomalyConfig,
        cancel: &CancellationToken,
        mut spikes: F,
    ) -> Result<Vec<AnomalyResult>>
    where
        F: FnMut(&[f64], &AnomalyConfig) -> SpikeOutcome,
    {
        config.validate()?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        check(cancel)?;

        let mut results = Vec::new();
        if traces.len() >= config.min_samples_required {
            let spans = traces
                .iter()
                .flat_map(|t| t.all_spans().iter())
                .collect::<Vec<_>>();
            results.extend(span_pass(&spans, config, cancel, &mut spikes)?);
            check(cancel)?;
            results.extend(trace_pass(traces, config));
        } else {
            debug!(
                traces = traces.len(),
                min_samples = config.min_samples_required,
                "too few traces for anomaly detection"
            );
        }
        sort_by_severity(&mut results);
        check(cancel)?;

        let ids = results.iter().map(|r| r.trace_id.clone()).collect();
        if self.published.publish(generation, ids) {
            info!(generation, anomalies = results.len(), "published anomaly set");
        } else {
            debug!(generation, "newer detection pass already published");
        }
        Ok(results)
    }

    pub fn detect_span_anomalies(
        &self,
        spans: &[Span],
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyResult>> {
        self.detect_span_anomalies_with(spans, &self.config, cancel)
    }

    /// Span-only pass; flagged trace ids are added to the current set.
    pub fn detect_span_anomalies_with(
        &self,
        spans: &[Span],
        config: &AnomalyConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<AnomalyResult>> {
        config.validate()?;
        check(cancel)?;
        if spans.len() < config.min_samples_required {
            return Ok(Vec::new());
        }
        let refs = spans.iter().collect::<Vec<_>>();
        let mut results = span_pass(&refs, config, cancel, &mut run_spikes)?;
        sort_by_severity(&mut results);
        check(cancel)?;
        self.published
            .extend(results.iter().map(|r| r.trace_id.clone()));
        Ok(results)
    }

    /// Runs a full pass on the blocking pool; the handle can cancel it.
    pub fn spawn_detection(self: &Arc<Self>, traces: Arc<Vec<Trace>>) -> DetectionHandle {
        let token = CancellationToken::new();
        let engine = self.clone();
        let task_token = token.clone();
        let task = tokio::task::spawn_blocking(move || {
            engine.detect_anomalies(&traces, &task_token)
        });
        DetectionHandle { token, task }
    }
}

/// A background detection pass.
pub struct DetectionHandle {
    token: CancellationToken,
    task: JoinHandle<Result<Vec<AnomalyResult>>>,
}

impl DetectionHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<Vec<AnomalyResult>> {
        self.task
            .await
            .map_err(|e| TraceLensError::Internal(format!("detection task failed: {e}")))?
    }
}

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TraceLensError::Cancelled);
    }
    Ok(())
}

fn sort_by_severity(results: &mut [AnomalyResult]) {
    results.sort_by(|a, b| {
        b.severity
            .total_cmp(&a.severity)
            .then_with(|| a.trace_id.cmp(&b.trace_id))
            .then_with(|| a.span_id.cmp(&b.span_id))
    });
}

fn run_spikes(durations: &[f64], config: &AnomalyConfig) -> SpikeOutcome {
    let window = SpikeDetector::window_for(durations.len(), config.spike_history_cap);
    let detector = SpikeDetector::new(window, config.confidence_level)?;
    let points = detector.run(durations)?;
    Ok((detector, points))
}

fn span_pass<F>(
    spans: &[&Span],
    config: &AnomalyConfig,
    cancel: &CancellationToken,
    spikes: &mut F,
) -> Result<Vec<AnomalyResult>>
where
    F: FnMut(&[f64], &AnomalyConfig) -> SpikeOutcome,
{
    let detector = ZScoreDetector::new(config);
    let mut groups: BTreeMap<&str, Vec<&Span>> = BTreeMap::new();
    for &span in spans {
        groups.entry(span.name.as_str()).or_default().push(span);
    }

    // Highest severity per (trace, span).
    let mut best: HashMap<(String, String), AnomalyResult> = HashMap::new();
    let mut keep = |result: AnomalyResult| {
        let key = (result.trace_id.clone(), result.span_id.clone());
        match best.get(&key) {
            Some(existing) if existing.severity >= result.severity => {}
            _ => {
                best.insert(key, result);
            }
        }
    };

    for (name, mut group) in groups {
        check(cancel)?;
        if group.len() < config.min_samples_required {
            continue;
        }
        group.sort_by_key(|s| s.timestamp);
        let durations = group.iter().map(|s| s.duration_ms()).collect::<Vec<_>>();
        let summary = Summary::from_samples(&durations);

        for (span, &ms) in group.iter().zip(&durations) {
            if let Some(hit) = detector.evaluate(&summary, ms) {
                keep(AnomalyResult {
                    trace_id: span.trace_id.clone(),
                    span_id: span.span_id.clone(),
                    kind: AnomalyKind::Duration,
                    description: format!(
                        "{name} took {ms:.2}ms (expected {:.2}ms ± {:.2}ms, {:.1}σ)",
                        summary.mean, summary.std_dev, hit.z_score
                    ),
                    severity: hit.severity,
                    expected_ms: Some(summary.mean),
                    actual_ms: Some(ms),
                });
            }
        }

        if group.len() < config.spike_min_samples {
            continue;
        }
        match spikes(&durations, config) {
            Ok((detector, points)) => {
                for point in points.into_iter().filter(|p| p.alert) {
                    let span = group[point.index];
                    let severity = (1.0 - point.p_value / detector.alpha()).clamp(0.0, 1.0);
                    keep(AnomalyResult {
                        trace_id: span.trace_id.clone(),
                        span_id: span.span_id.clone(),
                        kind: AnomalyKind::Spike,
                        description: format!(
                            "{name} spiked to {:.2}ms, {:.2}ms above recent history (p={:.4})",
                            durations[point.index], point.score, point.p_value
                        ),
                        severity,
                        expected_ms: Some(durations[point.index] - point.score),
                        actual_ms: Some(durations[point.index]),
                    });
                }
            }
            Err(e) => {
                warn!(span_name = name, error = %e, "spike detection failed, using statistics only");
            }
        }
    }

    Ok(best.into_values().collect())
}

fn trace_pass(traces: &[Trace], config: &AnomalyConfig) -> Vec<AnomalyResult> {
    let detector = ZScoreDetector::new(config);
    let totals = traces
        .iter()
        .map(Trace::total_duration_ms)
        .collect::<Vec<_>>();
    let summary = Summary::from_samples(&totals);

    traces
        .iter()
        .zip(&totals)
        .filter_map(|(trace, &ms)| {
            let hit = detector.evaluate(&summary, ms)?;
            Some(AnomalyResult {
                trace_id: trace.trace_id().to_string(),
                span_id: trace.root_span().span_id.clone(),
                kind: AnomalyKind::TraceDuration,
                description: format!(
                    "trace {} took {ms:.2}ms (expected {:.2}ms ± {:.2}ms, {:.1}σ)",
                    trace.entry_point(),
                    summary.mean,
                    summary.std_dev,
                    hit.z_score
                ),
                severity: hit.severity,
                expected_ms: Some(summary.mean),
                actual_ms: Some(ms),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use tracelens_core::model::SpanStatus;
    use testkit::{at_offset_ms, single_span_trace, span, traces_with_outlier};

    use super::*;

    fn engine() -> AnomalyEngine {
        AnomalyEngine::new(AnomalyConfig::default())
    }

    #[test]
    fn flags_ten_x_outlier() {
        let engine = engine();
        let traces = traces_with_outlier(19, 100, 1000);
        let results = engine
            .detect_anomalies(&traces, &CancellationToken::new())
            .unwrap();

        assert!(!results.is_empty());
        assert!(results.iter().any(|r| r.trace_id == "outlier"));
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.severity)));
        assert!(results.iter().all(|r| r.trace_id == "outlier"));
        assert!(engine.anomalous_trace_ids().contains("outlier"));
        assert_eq!(engine.anomalous_trace_ids().len(), 1);
    }

    #[test]
    fn span_duplicates_keep_highest_severity() {
        let traces = traces_with_outlier(19, 100, 1000);
        let results = engine()
            .detect_anomalies(&traces, &CancellationToken::new())
            .unwrap();
        let span_level = results
            .iter()
            .filter(|r| r.kind != AnomalyKind::TraceDuration)
            .count();
        assert_eq!(span_level, 1);
        assert!(
            results
                .iter()
                .any(|r| r.kind == AnomalyKind::TraceDuration && r.span_id == "outlier-root")
        );
    }

    #[test]
    fn too_few_samples_is_empty() {
        let engine = engine();
        let traces = traces_with_outlier(5, 100, 1000);
        let results = engine
            .detect_anomalies(&traces, &CancellationToken::new())
            .unwrap();
        assert!(results.is_empty());
        assert!(engine.anomalous_trace_ids().is_empty());
    }

    #[test]
    fn uniform_durations_are_not_anomalous() {
        let traces = (0..30)
            .map(|i| single_span_trace(&format!("t{i}"), "op", SpanStatus::Ok, 100))
            .collect::<Vec<_>>();
        let results = engine()
            .detect_anomalies(&traces, &CancellationToken::new())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn cancelled_pass_keeps_previous_set() {
        let engine = engine();
        engine
            .detect_anomalies(&traces_with_outlier(19, 100, 1000), &CancellationToken::new())
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .detect_anomalies(&traces_with_outlier(19, 100, 5000), &cancel)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(engine.anomalous_trace_ids().contains("outlier"));
    }

    #[test]
    fn cancellation_between_groups_stops_the_pass() {
        let engine = engine();
        engine
            .detect_anomalies(&traces_with_outlier(19, 100, 1000), &CancellationToken::new())
            .unwrap();
        let before = engine.anomalous_trace_ids();

        let traces = (0..20)
            .flat_map(|i| {
                [
                    single_span_trace(&format!("a{i:02}"), "alpha", SpanStatus::Ok, 100 + i),
                    single_span_trace(&format!("b{i:02}"), "beta", SpanStatus::Ok, 100 + i),
                ]
            })
            .collect::<Vec<_>>();
        let cancel = CancellationToken::new();
        let mut groups_seen = 0;
        let err = engine
            .full_pass(&traces, engine.config(), &cancel, |durations, config| {
                groups_seen += 1;
                cancel.cancel();
                run_spikes(durations, config)
            })
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(groups_seen, 1);
        assert_eq!(engine.anomalous_trace_ids(), before);
    }

    #[test]
    fn spike_failure_keeps_statistical_results() {
        let engine = engine();
        let traces = traces_with_outlier(19, 100, 1000);
        let mut calls = 0;
        let results = engine
            .full_pass(&traces, engine.config(), &CancellationToken::new(), |_, _| {
                calls += 1;
                Err(SpikeError::NonFinite { index: 0 })
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert!(
            results
                .iter()
                .any(|r| r.kind == AnomalyKind::Duration && r.trace_id == "outlier")
        );
        assert!(results.iter().all(|r| r.kind != AnomalyKind::Spike));
        assert!(engine.anomalous_trace_ids().contains("outlier"));
    }

    #[test]
    fn full_pass_replaces_set() {
        let engine = engine();
        engine.anomaly_set().extend(["stale".to_string()]);
        engine
            .detect_anomalies(&traces_with_outlier(19, 100, 1000), &CancellationToken::new())
            .unwrap();
        assert!(!engine.anomalous_trace_ids().contains("stale"));
    }

    #[test]
    fn span_pass_extends_set() {
        let engine = engine();
        engine.anomaly_set().extend(["earlier".to_string()]);
        let mut spans = (0..15)
            .map(|i| at_offset_ms(span(&format!("t{i}"), "s", "", "db.query", 10), i))
            .collect::<Vec<_>>();
        spans.push(at_offset_ms(span("slow", "s", "", "db.query", 400), 100));

        let results = engine
            .detect_span_anomalies(&spans, &CancellationToken::new())
            .unwrap();
        assert_eq!(results[0].trace_id, "slow");
        let ids = engine.anomalous_trace_ids();
        assert!(ids.contains("slow"));
        assert!(ids.contains("earlier"));
    }

    #[test]
    fn spike_only_flags_late_jump() {
        // Alternating durations keep the group spread wide, so only the spike test sees the jump.
        let mut spans = (0..30)
            .map(|i| {
                let ms = if i % 2 == 0 { 50 } else { 150 };
                at_offset_ms(span(&format!("t{i:02}"), "s", "", "render", ms), i)
            })
            .collect::<Vec<_>>();
        spans.push(at_offset_ms(span("late", "s", "", "render", 200), 100));

        let results = engine()
            .detect_span_anomalies(&spans, &CancellationToken::new())
            .unwrap();
        let late = results.iter().find(|r| r.trace_id == "late").unwrap();
        assert_eq!(late.kind, AnomalyKind::Spike);
        assert!((0.0..=1.0).contains(&late.severity));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = AnomalyConfig {
            confidence_level: 1.5,
            ..AnomalyConfig::default()
        };
        let err = engine()
            .detect_anomalies_with(&[], &config, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, TraceLensError::Config(_)));
    }

    #[tokio::test]
    async fn background_detection_publishes() {
        let engine = Arc::new(engine());
        let handle = engine.spawn_detection(Arc::new(traces_with_outlier(19, 100, 1000)));
        let results = handle.join().await.unwrap();
        assert!(!results.is_empty());
        assert!(engine.anomaly_set().contains("outlier"));
        assert_eq!(engine.anomaly_set().generation(), 1);
    }

    #[test]
    fn stale_generation_does_not_publish() {
        let engine = engine();
        engine.anomaly_set().publish(10, HashSet::from(["newer".to_string()]));
        engine
            .detect_anomalies(&traces_with_outlier(19, 100, 1000), &CancellationToken::new())
            .unwrap();
        assert!(engine.anomalous_trace_ids().contains("newer"));
    }
}
