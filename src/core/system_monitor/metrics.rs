use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Host metrics the agent samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    Temperature,
    Network,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::Temperature,
        MetricKind::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::Temperature => "temperature",
            MetricKind::Network => "network",
        }
    }

    /// Unit suffix used in alert messages
    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::Cpu | MetricKind::Memory | MetricKind::Disk => "%",
            MetricKind::Temperature => "°C",
            MetricKind::Network => " errors",
        }
    }

    /// Weight of this metric in the aggregate health score
    pub fn health_weight(&self) -> f64 {
        match self {
            MetricKind::Cpu => 35.0,
            MetricKind::Memory => 35.0,
            MetricKind::Disk => 25.0,
            MetricKind::Temperature => 30.0,
            MetricKind::Network => 15.0,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single raw reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(metric: MetricKind, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            metric,
            value,
            timestamp,
        }
    }

    /// Sample stamped with the current time
    pub fn now(metric: MetricKind, value: f64) -> Self {
        Self::new(metric, value, Utc::now())
    }
}

/// Coarse direction of a metric over its window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// Derived statistics for one metric after ingesting a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResult {
    pub metric: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub moving_average: f64,
    pub std_dev: f64,
    pub z_score: f64,
    pub trend_slope: f64,
    pub trend: Trend,
    /// Normalized penalty in [0, 1]; 0 means nominal
    pub health_contribution: f64,
    pub window_len: usize,
    /// False while the window is below the minimum size
    pub warm: bool,
}

impl AnalyticsResult {
    /// Result carrying no deviation signal, used before any valid sample
    pub fn neutral(metric: MetricKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            metric,
            value: 0.0,
            timestamp,
            moving_average: 0.0,
            std_dev: 0.0,
            z_score: 0.0,
            trend_slope: 0.0,
            trend: Trend::InsufficientData,
            health_contribution: 0.0,
            window_len: 0,
            warm: false,
        }
    }
}
