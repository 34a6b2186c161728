//! Alert system for monitoring critical conditions.
//!
//! Runs a per-metric state machine with hysteresis over analytics results and
//! emits exactly one [`Alert`] per state transition.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::metrics::{AnalyticsResult, MetricKind};
use crate::error::{EdgeError, Result};

pub const DEFAULT_RECOVERY_DWELL: Duration = Duration::from_secs(90);

/// Thresholds for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub metric: MetricKind,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub hysteresis_margin: f64,
}

impl AlertRule {
    pub fn new(metric: MetricKind, warning: f64, critical: f64, margin: f64) -> Self {
        Self {
            metric,
            warning_threshold: warning,
            critical_threshold: critical,
            hysteresis_margin: margin,
        }
    }

    /// Safe default thresholds per metric
    pub fn default_for(metric: MetricKind) -> Self {
        match metric {
            MetricKind::Cpu => Self::new(metric, 75.0, 90.0, 5.0),
            MetricKind::Memory => Self::new(metric, 80.0, 95.0, 5.0),
            MetricKind::Disk => Self::new(metric, 85.0, 95.0, 5.0),
            MetricKind::Temperature => Self::new(metric, 75.0, 90.0, 5.0),
            MetricKind::Network => Self::new(metric, 10.0, 100.0, 5.0),
        }
    }

    /// Reject rules whose thresholds would invert the state machine
    pub fn validate(&self) -> Result<()> {
        let w = self.warning_threshold;
        let c = self.critical_threshold;
        let m = self.hysteresis_margin;

        if !w.is_finite() || !c.is_finite() || !m.is_finite() {
            return Err(EdgeError::config_validation(format!(
                "{} rule has non-finite values",
                self.metric
            )));
        }
        if c <= w {
            return Err(EdgeError::config_validation(format!(
                "{} rule: critical threshold {} must be greater than warning threshold {}",
                self.metric, c, w
            )));
        }
        if m < 0.0 {
            return Err(EdgeError::config_validation(format!(
                "{} rule: hysteresis margin {} must not be negative",
                self.metric, m
            )));
        }
        Ok(())
    }

    /// Value below which an elevated metric starts recovering
    pub fn recovery_threshold(&self) -> f64 {
        self.warning_threshold - self.hysteresis_margin
    }
}

/// Active rule per metric; missing metrics fall back to their defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: BTreeMap<MetricKind, AlertRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: MetricKind::ALL
                .iter()
                .map(|&m| (m, AlertRule::default_for(m)))
                .collect(),
        }
    }
}

impl RuleSet {
    /// Build from defaults, applying every valid rule and collecting rejections
    pub fn from_rules<I>(rules: I) -> (Self, Vec<EdgeError>)
    where
        I: IntoIterator<Item = AlertRule>,
    {
        let mut set = Self::default();
        let rejected = set.apply_all(rules);
        (set, rejected)
    }

    pub fn get(&self, metric: MetricKind) -> AlertRule {
        self.rules
            .get(&metric)
            .copied()
            .unwrap_or_else(|| AlertRule::default_for(metric))
    }

    /// Replace the rule for its metric; an invalid rule leaves the prior one active
    pub fn apply(&mut self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        self.rules.insert(rule.metric, rule);
        Ok(())
    }

    pub fn apply_all<I>(&mut self, rules: I) -> Vec<EdgeError>
    where
        I: IntoIterator<Item = AlertRule>,
    {
        rules
            .into_iter()
            .filter_map(|rule| self.apply(rule).err())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlertRule> {
        self.rules.values()
    }

    pub fn to_vec(&self) -> Vec<AlertRule> {
        self.rules.values().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Normal,
    Warning,
    Critical,
    Recovering,
}

impl AlertState {
    fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Normal => AlertState::Normal,
            Severity::Warning => AlertState::Warning,
            Severity::Critical => AlertState::Critical,
        }
    }
}

/// An emitted state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub metric: MetricKind,
    pub severity: Severity,
    pub state: AlertState,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone)]
struct MetricTracker {
    state: AlertState,
    last_transition: Option<DateTime<Utc>>,
    /// Severity held before entering Recovering
    prior: Severity,
    recovering_since: Option<DateTime<Utc>>,
    last_alert: Option<Alert>,
}

impl Default for MetricTracker {
    fn default() -> Self {
        Self {
            state: AlertState::Normal,
            last_transition: None,
            prior: Severity::Normal,
            recovering_since: None,
            last_alert: None,
        }
    }
}

/// Per-metric alert state machine
#[derive(Debug)]
pub struct AlertManager {
    trackers: HashMap<MetricKind, MetricTracker>,
    dwell: TimeDelta,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::with_dwell(DEFAULT_RECOVERY_DWELL)
    }

    /// `dwell` is how long a value must stay low before Recovering becomes Normal
    pub fn with_dwell(dwell: Duration) -> Self {
        Self {
            trackers: HashMap::new(),
            dwell: TimeDelta::from_std(dwell).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Advance the metric's state machine; returns an alert only on a transition
    pub fn evaluate(&mut self, result: &AnalyticsResult, rule: &AlertRule) -> Option<Alert> {
        let value = result.value;
        if !value.is_finite() {
            return None;
        }

        let rule = match rule.validate() {
            Ok(()) if rule.metric == result.metric => *rule,
            Ok(()) => AlertRule::default_for(result.metric),
            Err(e) => {
                log::warn!("Ignoring invalid rule for {}: {}", result.metric, e);
                AlertRule::default_for(result.metric)
            }
        };

        let critical = rule.critical_threshold;
        let warning = rule.warning_threshold;
        let recover_at = rule.recovery_threshold();
        let dwell = self.dwell;
        let tracker = self.trackers.entry(result.metric).or_default();

        let next = match tracker.state {
            AlertState::Normal => {
                if value >= critical {
                    Some(AlertState::Critical)
                } else if value >= warning {
                    Some(AlertState::Warning)
                } else {
                    None
                }
            }
            AlertState::Warning => {
                if value >= critical {
                    Some(AlertState::Critical)
                } else if value < recover_at {
                    Some(AlertState::Recovering)
                } else {
                    None
                }
            }
            AlertState::Critical => {
                if value < recover_at {
                    Some(AlertState::Recovering)
                } else if value < critical - rule.hysteresis_margin {
                    Some(AlertState::Warning)
                } else {
                    None
                }
            }
            AlertState::Recovering => {
                if value >= critical {
                    Some(AlertState::Critical)
                } else if value >= recover_at {
                    Some(AlertState::from_severity(tracker.prior))
                } else {
                    let since = tracker.recovering_since.unwrap_or(result.timestamp);
                    if result.timestamp - since >= dwell {
                        Some(AlertState::Normal)
                    } else {
                        None
                    }
                }
            }
        }?;

        let from = tracker.state;
        match next {
            AlertState::Recovering => {
                tracker.prior = severity_of(from, tracker.prior);
                tracker.recovering_since = Some(result.timestamp);
            }
            AlertState::Normal => {
                tracker.prior = Severity::Normal;
                tracker.recovering_since = None;
            }
            AlertState::Warning | AlertState::Critical => {
                tracker.recovering_since = None;
            }
        }
        tracker.state = next;
        tracker.last_transition = Some(result.timestamp);

        let severity = severity_of(next, tracker.prior);
        let alert = Alert {
            metric: result.metric,
            severity,
            state: next,
            value,
            timestamp: result.timestamp,
            message: describe(&rule, from, next, value),
        };
        tracker.last_alert = Some(alert.clone());

        log::info!("Alert transition: {}", alert.message);
        Some(alert)
    }

    pub fn state(&self, metric: MetricKind) -> AlertState {
        self.trackers
            .get(&metric)
            .map(|t| t.state)
            .unwrap_or(AlertState::Normal)
    }

    pub fn last_transition(&self, metric: MetricKind) -> Option<DateTime<Utc>> {
        self.trackers.get(&metric).and_then(|t| t.last_transition)
    }

    /// Latest alert for every metric that is not Normal
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .trackers
            .values()
            .filter(|t| t.state != AlertState::Normal)
            .filter_map(|t| t.last_alert.clone())
            .collect();
        alerts.sort_by_key(|a| a.metric);
        alerts
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

fn severity_of(state: AlertState, prior: Severity) -> Severity {
    match state {
        AlertState::Normal => Severity::Normal,
        AlertState::Warning => Severity::Warning,
        AlertState::Critical => Severity::Critical,
        AlertState::Recovering => prior,
    }
}

fn describe(rule: &AlertRule, from: AlertState, to: AlertState, value: f64) -> String {
    let metric = rule.metric;
    let unit = metric.unit();
    match to {
        AlertState::Critical => format!(
            "{} at {:.1}{} (critical threshold: {:.1}{})",
            metric, value, unit, rule.critical_threshold, unit
        ),
        AlertState::Warning if from == AlertState::Critical => format!(
            "{} eased to {:.1}{} (below critical threshold: {:.1}{})",
            metric, value, unit, rule.critical_threshold, unit
        ),
        AlertState::Warning => format!(
            "{} at {:.1}{} (warning threshold: {:.1}{})",
            metric, value, unit, rule.warning_threshold, unit
        ),
        AlertState::Recovering => format!(
            "{} recovering at {:.1}{} (below {:.1}{})",
            metric,
            value,
            unit,
            rule.recovery_threshold(),
            unit
        ),
        AlertState::Normal => format!("{} back to normal at {:.1}{}", metric, value, unit),
    }
}
