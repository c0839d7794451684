use tracelens_core::config::AnomalyConfig;

/// Mean and Bessel-corrected standard deviation of a duration sample, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Summary {
    pub fn from_samples(samples: &[f64]) -> Self {
        let count = samples.len();
        if count == 0 {
            return Self {
                count,
                mean: 0.0,
                std_dev: 0.0,
            };
        }
        let mean = samples.iter().sum::<f64>() / count as f64;
        let std_dev = if count <= 1 {
            0.0
        } else {
            let variance =
                samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        };
        Self {
            count,
            mean,
            std_dev,
        }
    }

    /// Zero when the sample has no spread.
    pub fn z_score(&self, value: f64) -> f64 {
        if self.std_dev > 0.0 {
            (value - self.mean) / self.std_dev
        } else {
            0.0
        }
    }
}

/// Two-sided normal critical value for the configured confidence level.
pub fn z_threshold(confidence_level: f64) -> f64 {
    if confidence_level >= 0.99 {
        2.576
    } else if confidence_level >= 0.95 {
        1.96
    } else {
        1.645
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outlier {
    pub z_score: f64,
    pub severity: f64,
}

/// Flags a sample that is either far from the mean in standard deviations or a multiple of it.
#[derive(Debug, Clone, Copy)]
pub struct ZScoreDetector {
    threshold: f64,
    multiplier: f64,
}

impl ZScoreDetector {
    pub fn new(config: &AnomalyConfig) -> Self {
        Self {
            threshold: z_threshold(config.confidence_level),
            multiplier: config.duration_threshold_multiplier,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn evaluate(&self, summary: &Summary, value: f64) -> Option<Outlier> {
        let z = summary.z_score(value);
        let beyond_z = z.abs() > self.threshold;
        let beyond_multiple = summary.mean > 0.0 && value > summary.mean * self.multiplier;
        if !(beyond_z || beyond_multiple) {
            return None;
        }
        Some(Outlier {
            z_score: z,
            severity: (z.abs() / (2.0 * self.threshold)).clamp(0.0, 1.0),
        })
    }
}
