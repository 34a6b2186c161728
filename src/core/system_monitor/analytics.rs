//! Local analytics over rolling metric windows.
//!
//! Every ingested sample yields an [`AnalyticsResult`] with moving average,
//! z-score, trend slope and a normalized health penalty. The engine keeps no
//! hidden state besides the windows, so the same sample sequence always
//! produces the same results.

use std::collections::BTreeMap;

use super::alerts::{AlertRule, RuleSet};
use super::history::{MetricSeries, DEFAULT_WINDOW_SIZE};
use super::metrics::{AnalyticsResult, MetricKind, Sample, Trend};

pub const DEFAULT_MIN_SAMPLES: usize = 3;

/// |z| at which the deviation part of the penalty saturates
const Z_SATURATION: f64 = 3.0;
const PROXIMITY_WEIGHT: f64 = 0.7;
const DEVIATION_WEIGHT: f64 = 0.3;
/// Slope magnitude below which a series counts as stable (units per sample)
const TREND_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticsConfig {
    pub window_size: usize,
    pub min_samples: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    rules: RuleSet,
    series: BTreeMap<MetricKind, MetricSeries>,
    latest: BTreeMap<MetricKind, AnalyticsResult>,
}

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self::with_config(AnalyticsConfig::default(), RuleSet::default())
    }

    pub fn with_config(config: AnalyticsConfig, rules: RuleSet) -> Self {
        let config = AnalyticsConfig {
            window_size: config.window_size.max(1),
            min_samples: config.min_samples.max(1),
        };
        Self {
            config,
            rules,
            series: BTreeMap::new(),
            latest: BTreeMap::new(),
        }
    }

    /// Swap the rules used for threshold proximity
    pub fn set_rules(&mut self, rules: RuleSet) {
        self.rules = rules;
    }

    pub fn ingest(&mut self, sample: Sample) -> AnalyticsResult {
        if !sample.value.is_finite() {
            log::warn!(
                "Dropping non-finite {} sample: {}",
                sample.metric,
                sample.value
            );
            return self
                .latest
                .get(&sample.metric)
                .cloned()
                .unwrap_or_else(|| AnalyticsResult::neutral(sample.metric, sample.timestamp));
        }

        let window_size = self.config.window_size;
        let series = self
            .series
            .entry(sample.metric)
            .or_insert_with(|| MetricSeries::with_capacity(window_size));
        series.push(sample);

        let window_len = series.len();
        let warm = window_len >= self.config.min_samples;
        let moving_average = finite_or_zero(series.mean());
        let std_dev = finite_or_zero(series.std_dev());
        let trend_slope = finite_or_zero(series.slope());

        let z_score = if warm && std_dev > 0.0 {
            finite_or_zero((sample.value - moving_average) / std_dev)
        } else {
            0.0
        };

        let trend = if warm {
            classify_trend(trend_slope)
        } else {
            Trend::InsufficientData
        };

        let health_contribution = if warm {
            contribution(sample.value, z_score, &self.rules.get(sample.metric))
        } else {
            0.0
        };

        let result = AnalyticsResult {
            metric: sample.metric,
            value: sample.value,
            timestamp: sample.timestamp,
            moving_average,
            std_dev,
            z_score,
            trend_slope,
            trend,
            health_contribution,
            window_len,
            warm,
        };

        self.latest.insert(sample.metric, result.clone());
        result
    }

    /// `100 - weighted sum of contributions` over warm metrics, clamped to [0, 100]
    pub fn overall_score(&self) -> f64 {
        let penalty: f64 = self
            .latest
            .values()
            .filter(|r| r.warm)
            .map(|r| r.metric.health_weight() * r.health_contribution)
            .sum();
        (100.0 - penalty).clamp(0.0, 100.0)
    }

    pub fn latest(&self) -> Vec<AnalyticsResult> {
        self.latest.values().cloned().collect()
    }

    pub fn window_len(&self, metric: MetricKind) -> usize {
        self.series.get(&metric).map(|s| s.len()).unwrap_or(0)
    }

    pub fn config(&self) -> AnalyticsConfig {
        self.config
    }
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn classify_trend(slope: f64) -> Trend {
    if slope > TREND_TOLERANCE {
        Trend::Increasing
    } else if slope < -TREND_TOLERANCE {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Position of `value` relative to the rule thresholds, in [0, 1]
fn threshold_proximity(value: f64, rule: &AlertRule) -> f64 {
    let warning = rule.warning_threshold;
    let critical = rule.critical_threshold;
    let band = critical - warning;
    if band <= 0.0 {
        return if value >= critical { 1.0 } else { 0.0 };
    }

    if value >= critical {
        1.0
    } else if value >= warning {
        0.5 + 0.5 * (value - warning) / band
    } else {
        (0.5 * (value - (warning - band)) / band).clamp(0.0, 0.5)
    }
}

fn contribution(value: f64, z_score: f64, rule: &AlertRule) -> f64 {
    let proximity = threshold_proximity(value, rule);
    let deviation = (z_score.abs() / Z_SATURATION).min(1.0);
    finite_or_zero(PROXIMITY_WEIGHT * proximity + DEVIATION_WEIGHT * deviation).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn cpu(value: f64, secs: i64) -> Sample {
        Sample::new(MetricKind::Cpu, value, ts(secs))
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let config = AnalyticsConfig {
            window_size: 5,
            min_samples: 3,
        };
        let mut engine = AnalyticsEngine::with_config(config, RuleSet::default());
        for i in 0..50 {
            let result = engine.ingest(cpu((i % 7) as f64 * 10.0, i));
            assert!(result.window_len <= 5);
        }
        assert_eq!(engine.window_len(MetricKind::Cpu), 5);
    }

    #[test]
    fn test_identical_values_give_zero_z_score() {
        let mut engine = AnalyticsEngine::new();
        for i in 0..10 {
            let result = engine.ingest(cpu(42.0, i));
            assert_eq!(result.z_score, 0.0);
            assert!(result.z_score.is_finite());
        }
    }

    #[test]
    fn test_z_score_stays_finite_for_extreme_input() {
        let mut engine = AnalyticsEngine::new();
        let values = [f64::MAX, -f64::MAX, 1e308, f64::NAN, f64::INFINITY, 0.0, 1e-300];
        for (i, v) in values.iter().enumerate() {
            let result = engine.ingest(cpu(*v, i as i64));
            assert!(result.z_score.is_finite());
            assert!(result.health_contribution.is_finite());
        }
        let score = engine.overall_score();
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn test_cold_start_excludes_first_two_samples() {
        let mut engine = AnalyticsEngine::new();

        let first = engine.ingest(cpu(99.0, 0));
        assert!(!first.warm);
        assert_eq!(first.z_score, 0.0);
        assert_eq!(engine.overall_score(), 100.0);

        let second = engine.ingest(cpu(99.0, 30));
        assert!(!second.warm);
        assert_eq!(engine.overall_score(), 100.0);

        let third = engine.ingest(cpu(99.0, 60));
        assert!(third.warm);
        assert!(engine.overall_score() < 100.0);
    }

    #[test]
    fn test_spike_produces_positive_z_score() {
        let mut engine = AnalyticsEngine::new();
        for (i, v) in [20.0, 21.0, 19.0, 20.0, 22.0].iter().enumerate() {
            engine.ingest(cpu(*v, i as i64));
        }
        let spike = engine.ingest(cpu(80.0, 10));
        assert!(spike.z_score > 1.5);
        assert!(spike.health_contribution > 0.0);
    }

    #[test]
    fn test_trend_classification() {
        let mut engine = AnalyticsEngine::new();
        let mut last = None;
        for i in 0..6 {
            last = Some(engine.ingest(cpu(10.0 + i as f64 * 5.0, i)));
        }
        let result = last.unwrap();
        assert_eq!(result.trend, Trend::Increasing);
        assert!((result.trend_slope - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_nominal_metrics_keep_full_score() {
        let mut engine = AnalyticsEngine::new();
        for i in 0..5 {
            engine.ingest(cpu(20.0, i));
            engine.ingest(Sample::new(MetricKind::Memory, 30.0, ts(i)));
        }
        assert_eq!(engine.overall_score(), 100.0);
    }

    #[test]
    fn test_deterministic_results() {
        let samples: Vec<Sample> = (0..30)
            .map(|i| cpu(((i * 37) % 100) as f64, i))
            .collect();

        let mut a = AnalyticsEngine::new();
        let mut b = AnalyticsEngine::new();
        let ra: Vec<_> = samples.iter().map(|s| a.ingest(*s)).collect();
        let rb: Vec<_> = samples.iter().map(|s| b.ingest(*s)).collect();
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_proximity_ramps_through_thresholds() {
        let rule = AlertRule::new(MetricKind::Cpu, 80.0, 90.0, 5.0);
        assert_eq!(threshold_proximity(50.0, &rule), 0.0);
        assert!((threshold_proximity(75.0, &rule) - 0.25).abs() < 1e-9);
        assert!((threshold_proximity(80.0, &rule) - 0.5).abs() < 1e-9);
        assert!((threshold_proximity(85.0, &rule) - 0.75).abs() < 1e-9);
        assert_eq!(threshold_proximity(95.0, &rule), 1.0);
    }
}
