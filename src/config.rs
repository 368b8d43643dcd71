use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::keywords::KeywordSet;

/// A phase label that applies once `tick >= min_tick`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StepThreshold {
    pub min_tick: u8,
    pub label: String,
}

impl StepThreshold {
    fn new(min_tick: u8, label: &str) -> Self {
        Self {
            min_tick,
            label: label.to_string(),
        }
    }
}

/// Tunable constants of the simulated scan.
///
/// Every field has a default, so a policy file only needs the values it overrides.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanPolicy {
    /// Timer loop period in milliseconds.
    pub tick_interval_ms: u64,
    /// Simulated connection setup before the first tick.
    pub connect_delay_ms: u64,
    /// Chance that a tick produces a log line.
    pub log_probability: f64,
    /// Multiplier from mean to peak requests per second.
    pub burst_multiplier: f64,
    /// How many chart points a display keeps.
    pub chart_window: usize,
    /// Ascending by `min_tick`, first entry at 0.
    pub steps: Vec<StepThreshold>,
    pub keywords: KeywordSet,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            connect_delay_ms: 1_000,
            log_probability: 0.35,
            burst_multiplier: 5.0,
            chart_window: 30,
            steps: default_steps(),
            keywords: KeywordSet::default(),
        }
    }
}

pub fn default_steps() -> Vec<StepThreshold> {
    vec![
        StepThreshold::new(0, "Initializing..."),
        StepThreshold::new(11, "Resolving DNS & Headers"),
        StepThreshold::new(31, "Crawling Assets & Media"),
        StepThreshold::new(61, "Analyzing Server Response Time"),
        StepThreshold::new(86, "Calculating Resource Overhead"),
        StepThreshold::new(100, "Finalizing Report"),
    ]
}

impl ScanPolicy {
    /// Load a policy from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file: {}", path.display()))?;
        let policy: ScanPolicy = serde_json::from_str(&content)
            .with_context(|| format!("invalid policy file: {}", path.display()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.log_probability) {
            bail!("log_probability must be within [0, 1], got {}", self.log_probability);
        }
        if self.burst_multiplier.is_nan() || self.burst_multiplier < 0.0 {
            bail!("burst_multiplier must be non-negative, got {}", self.burst_multiplier);
        }
        if self.chart_window == 0 {
            bail!("chart_window must be greater than zero");
        }
        match self.steps.first() {
            None => bail!("steps must not be empty"),
            Some(first) if first.min_tick != 0 => {
                bail!("first step must start at tick 0, got {}", first.min_tick)
            }
            Some(_) => {}
        }
        if let Some(w) = self.steps.windows(2).find(|w| w[0].min_tick >= w[1].min_tick) {
            bail!(
                "steps must be strictly ascending: {} then {}",
                w[0].min_tick,
                w[1].min_tick
            );
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        ScanPolicy::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let p: ScanPolicy = serde_json::from_str(r#"{ "tick_interval_ms": 80 }"#).unwrap();
        assert_eq!(p.tick_interval_ms, 80);
        assert_eq!(p.connect_delay_ms, 1_000);
        assert_eq!(p.steps, default_steps());
    }

    #[test]
    fn load_policy_file_round_trip() {
        let mut policy = ScanPolicy::default();
        policy.tick_interval_ms = 90;
        policy.keywords.heavy.push("forum".into());

        let file = tempfile::NamedTempFile::new().unwrap();
        serde_json::to_writer_pretty(file.as_file(), &policy).unwrap();
        assert_eq!(ScanPolicy::load(file.path()).unwrap(), policy);
    }

    #[test]
    fn load_policy_overriding_one_keyword_list() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), r#"{ "keywords": { "heavy": ["forum"] } }"#).unwrap();

        let p = ScanPolicy::load(file.path()).unwrap();
        assert_eq!(p.keywords.heavy, vec!["forum"]);
        assert_eq!(p.keywords.static_sites, KeywordSet::default().static_sites);
        assert_eq!(p.tick_interval_ms, 100);
    }

    #[test]
    fn load_rejects_invalid_policy_values() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), r#"{ "log_probability": 2.0 }"#).unwrap();
        assert!(ScanPolicy::load(file.path()).is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let p = ScanPolicy {
            tick_interval_ms: 0,
            ..ScanPolicy::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let p = ScanPolicy {
            log_probability: 1.5,
            ..ScanPolicy::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_unordered_steps() {
        let mut p = ScanPolicy::default();
        p.steps.swap(1, 2);
        assert!(p.validate().is_err());
    }
}
