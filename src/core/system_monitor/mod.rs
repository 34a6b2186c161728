//! Device health monitoring core.
//!
//! Samples flow from a [`SampleSource`] through the [`AnalyticsEngine`] into the
//! [`AlertManager`]; each sampling cycle ends with a fresh [`HealthSnapshot`].

pub mod alerts;
pub mod analytics;
mod collector;
mod health;
mod history;
mod metrics;
mod pipeline;

pub use alerts::{
    Alert, AlertManager, AlertRule, AlertState, RuleSet, Severity, DEFAULT_RECOVERY_DWELL,
};
pub use analytics::{AnalyticsConfig, AnalyticsEngine, DEFAULT_MIN_SAMPLES};
pub use collector::{CollectorConfig, SampleSource, SystemSampler};
pub use health::HealthSnapshot;
pub use history::{MetricSeries, DEFAULT_WINDOW_SIZE};
pub use metrics::{AnalyticsResult, MetricKind, Sample, Trend};
pub use pipeline::{CycleReport, MonitorPipeline};
