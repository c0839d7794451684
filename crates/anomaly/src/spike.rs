//! Streaming IID spike test over a trailing history window.

use thiserror::Error;

const MIN_BANDWIDTH: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
pub enum SpikeError {
    #[error("sample {index} is not finite")]
    NonFinite { index: usize },

    #[error("history window must be at least 1")]
    EmptyWindow,
}

/// Per-point output of the spike test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikePoint {
    pub index: usize,
    pub alert: bool,
    /// Distance above the trailing-history mean.
    pub score: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SpikeDetector {
    window: usize,
    alpha: f64,
}

impl SpikeDetector {
    pub fn new(window: usize, confidence_level: f64) -> Result<Self, SpikeError> {
        if window == 0 {
            return Err(SpikeError::EmptyWindow);
        }
        Ok(Self {
            window,
            alpha: 1.0 - confidence_level,
        })
    }

    /// History length for a series of `sample_count` points: half the series, capped.
    pub fn window_for(sample_count: usize, cap: usize) -> usize {
        (sample_count / 2).min(cap).max(1)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn run(&self, series: &[f64]) -> Result<Vec<SpikePoint>, SpikeError> {
        if let Some(index) = series.iter().position(|x| !x.is_finite()) {
            return Err(SpikeError::NonFinite { index });
        }

        let points = series
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                let start = index.saturating_sub(self.window);
                let history = &series[start..index];
                if history.len() < self.window {
                    return SpikePoint {
                        index,
                        alert: false,
                        score: 0.0,
                        p_value: 0.5,
                    };
                }
                let p_value = upper_tail_p(history, value);
                let score = value - history.iter().sum::<f64>() / history.len() as f64;
                SpikePoint {
                    index,
                    alert: p_value < self.alpha,
                    score,
                    p_value,
                }
            })
            .collect();
        Ok(points)
    }
}

fn upper_tail_p(history: &[f64], value: f64) -> f64 {
    let n = history.len();
    if n == 0 {
        return 0.5;
    }
    let spread = if n == 1 { 1.0 } else { sample_std(history) };
    let bandwidth =
        (std::f64::consts::SQRT_2 * spread * (n as f64).powf(-0.2)).max(MIN_BANDWIDTH);
    let mass = history
        .iter()
        .map(|h| erf((value - h) / bandwidth))
        .sum::<f64>();
    (0.5 - mass / (2.0 * n as f64)).clamp(0.0, 1.0)
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

// Abramowitz and Stegun 7.1.26, max error 1.5e-7.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erf_reference_values() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
        assert!((erf(10.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn window_is_half_the_series_capped() {
        assert_eq!(SpikeDetector::window_for(12, 50), 6);
        assert_eq!(SpikeDetector::window_for(500, 50), 50);
        assert_eq!(SpikeDetector::window_for(1, 50), 1);
    }

    #[test]
    fn flat_series_never_alerts() {
        let detector = SpikeDetector::new(6, 0.95).unwrap();
        let points = detector.run(&[100.0; 12]).unwrap();
        assert_eq!(points.len(), 12);
        assert!(points.iter().all(|p| !p.alert));
        assert_eq!(points[0].p_value, 0.5);
    }

    #[test]
    fn jump_above_history_alerts() {
        let mut series = vec![
            100.0, 102.0, 98.0, 101.0, 99.0, 100.0, 100.0, 99.0, 101.0, 100.0, 98.0,
        ];
        series.push(400.0);
        let window = SpikeDetector::window_for(series.len(), 50);
        let detector = SpikeDetector::new(window, 0.95).unwrap();
        let points = detector.run(&series).unwrap();

        let last = points.last().unwrap();
        assert!(last.alert);
        assert!(last.p_value < 0.05);
        assert!(last.score > 250.0);
        assert!(points[..11].iter().all(|p| !p.alert));
        assert!(points[..window].iter().all(|p| p.p_value == 0.5));
    }

    #[test]
    fn drop_below_history_is_not_a_spike() {
        let mut series = vec![100.0; 11];
        series.push(1.0);
        let points = SpikeDetector::new(6, 0.95).unwrap().run(&series).unwrap();
        assert!(!points[11].alert);
        assert!(points[11].p_value > 0.5);
    }

    #[test]
    fn rejects_non_finite_input() {
        let detector = SpikeDetector::new(3, 0.95).unwrap();
        assert_eq!(
            detector.run(&[1.0, f64::NAN]).unwrap_err(),
            SpikeError::NonFinite { index: 1 }
        );
        assert_eq!(SpikeDetector::new(0, 0.95).unwrap_err(), SpikeError::EmptyWindow);
    }
}
