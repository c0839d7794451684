use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceLensError};

/// Tuning knobs for one anomaly detection pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyConfig {
    pub confidence_level: f64,
    pub min_samples_required: usize,
    pub duration_threshold_multiplier: f64,
    /// Span-name groups smaller than this skip the streaming spike test.
    pub spike_min_samples: usize,
    /// Upper bound on the trailing history the spike test compares against.
    pub spike_history_cap: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            min_samples_required: 10,
            duration_threshold_multiplier: 2.0,
            spike_min_samples: 12,
            spike_history_cap: 50,
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(TraceLensError::Config(format!(
                "confidence_level must be within (0, 1), got {}",
                self.confidence_level
            )));
        }
        if !(self.duration_threshold_multiplier > 0.0) {
            return Err(TraceLensError::Config(format!(
                "duration_threshold_multiplier must be positive, got {}",
                self.duration_threshold_multiplier
            )));
        }
        if self.min_samples_required == 0 {
            return Err(TraceLensError::Config(
                "min_samples_required must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub confidence_level: f64,
    pub min_samples_required: usize,
    pub duration_threshold_multiplier: f64,
    pub spike_min_samples: usize,
    pub spike_history_cap: usize,
    pub debounce: Duration,
    pub watch_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let anomaly = AnomalyConfig::default();
        Self {
            confidence_level: anomaly.confidence_level,
            min_samples_required: anomaly.min_samples_required,
            duration_threshold_multiplier: anomaly.duration_threshold_multiplier,
            spike_min_samples: anomaly.spike_min_samples,
            spike_history_cap: anomaly.spike_history_cap,
            debounce: Duration::from_millis(500),
            watch_poll_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn anomaly(&self) -> AnomalyConfig {
        AnomalyConfig {
            confidence_level: self.confidence_level,
            min_samples_required: self.min_samples_required,
            duration_threshold_multiplier: self.duration_threshold_multiplier,
            spike_min_samples: self.spike_min_samples,
            spike_history_cap: self.spike_history_cap,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.anomaly().validate()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    confidence_level: Option<f64>,
    min_samples_required: Option<usize>,
    duration_threshold_multiplier: Option<f64>,
    spike_min_samples: Option<usize>,
    spike_history_cap: Option<usize>,
    debounce: Option<String>,
    watch_poll_interval: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACELENS_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("tracelens/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TraceLensError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TraceLensError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| TraceLensError::Config(format!("bad {name} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        confidence_level: env_parsed("TRACELENS_CONFIDENCE_LEVEL")?,
        min_samples_required: env_parsed("TRACELENS_MIN_SAMPLES")?,
        duration_threshold_multiplier: env_parsed("TRACELENS_DURATION_MULTIPLIER")?,
        spike_min_samples: None,
        spike_history_cap: None,
        debounce: env::var("TRACELENS_DEBOUNCE").ok(),
        watch_poll_interval: env::var("TRACELENS_WATCH_POLL").ok(),
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.confidence_level {
        cfg.confidence_level = v;
    }
    if let Some(v) = overrides.min_samples_required {
        cfg.min_samples_required = v;
    }
    if let Some(v) = overrides.duration_threshold_multiplier {
        cfg.duration_threshold_multiplier = v;
    }
    if let Some(v) = overrides.spike_min_samples {
        cfg.spike_min_samples = v;
    }
    if let Some(v) = overrides.spike_history_cap {
        cfg.spike_history_cap = v;
    }
    if let Some(v) = overrides.debounce {
        cfg.debounce = humantime::parse_duration(&v).map_err(|e| {
            TraceLensError::Config(format!("bad debounce in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.watch_poll_interval {
        cfg.watch_poll_interval = humantime::parse_duration(&v).map_err(|e| {
            TraceLensError::Config(format!(
                "bad watch_poll_interval in {source}: {e} (value={v})"
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn defaults_match_detection_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.confidence_level, 0.95);
        assert_eq!(cfg.min_samples_required, 10);
        assert_eq!(cfg.duration_threshold_multiplier, 2.0);
        assert_eq!(cfg.debounce, Duration::from_millis(500));
        assert_eq!(cfg.anomaly(), AnomalyConfig::default());
    }

    #[test]
    fn file_overrides_apply() {
        let mut cfg = Config::default();
        let overrides: ConfigOverrides = toml::from_str(
            r#"
            confidence_level = 0.99
            min_samples_required = 5
            debounce = "250ms"
            "#,
        )
        .unwrap();
        apply_overrides(&mut cfg, overrides, "config file").unwrap();
        assert_eq!(cfg.confidence_level, 0.99);
        assert_eq!(cfg.min_samples_required, 5);
        assert_eq!(cfg.debounce, Duration::from_millis(250));
    }

    #[test]
    fn bad_duration_names_source() {
        let mut cfg = Config::default();
        let overrides = ConfigOverrides {
            watch_poll_interval: Some("often".to_string()),
            ..ConfigOverrides::default()
        };
        let err = apply_overrides(&mut cfg, overrides, "environment").unwrap_err();
        assert!(err.to_string().contains("environment"));
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let cfg = AnomalyConfig {
            confidence_level: 1.5,
            ..AnomalyConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = AnomalyConfig {
            min_samples_required: 0,
            ..AnomalyConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(AnomalyConfig::default().validate().is_ok());
    }

    #[test]
    #[serial]
    fn env_overrides_apply() {
        // SAFETY: serialized with the other environment-mutating tests.
        unsafe {
            env::set_var("TRACELENS_MIN_SAMPLES", "20");
            env::set_var("TRACELENS_DEBOUNCE", "1s");
        }
        let cfg = Config::from_env();
        unsafe {
            env::remove_var("TRACELENS_MIN_SAMPLES");
            env::remove_var("TRACELENS_DEBOUNCE");
        }
        let cfg = cfg.unwrap();
        assert_eq!(cfg.min_samples_required, 20);
        assert_eq!(cfg.debounce, Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn env_rejects_garbage() {
        unsafe {
            env::set_var("TRACELENS_CONFIDENCE_LEVEL", "high");
        }
        let res = Config::from_env();
        unsafe {
            env::remove_var("TRACELENS_CONFIDENCE_LEVEL");
        }
        assert!(res.is_err());
    }
}
