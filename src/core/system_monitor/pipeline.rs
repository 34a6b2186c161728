use chrono::{DateTime, Utc};
use std::time::Duration;

use super::alerts::{Alert, AlertManager, RuleSet};
use super::analytics::{AnalyticsConfig, AnalyticsEngine};
use super::health::HealthSnapshot;
use super::metrics::{AnalyticsResult, Sample};

/// Everything one sampling cycle produced
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub results: Vec<AnalyticsResult>,
    pub new_alerts: Vec<Alert>,
    pub snapshot: HealthSnapshot,
}

/// Analytics followed by alert evaluation, owned by the sampling task
pub struct MonitorPipeline {
    engine: AnalyticsEngine,
    alerts: AlertManager,
}

impl MonitorPipeline {
    pub fn new(config: AnalyticsConfig, rules: RuleSet, dwell: Duration) -> Self {
        Self {
            engine: AnalyticsEngine::with_config(config, rules),
            alerts: AlertManager::with_dwell(dwell),
        }
    }

    /// Ingest one batch of samples; `now` stamps the snapshot when the batch is empty
    pub fn process(&mut self, samples: Vec<Sample>, rules: &RuleSet, now: DateTime<Utc>) -> CycleReport {
        self.engine.set_rules(rules.clone());

        let computed_at = samples.iter().map(|s| s.timestamp).max().unwrap_or(now);
        let mut results = Vec::with_capacity(samples.len());
        let mut new_alerts = Vec::new();

        for sample in samples {
            let result = self.engine.ingest(sample);
            if let Some(alert) = self.alerts.evaluate(&result, &rules.get(result.metric)) {
                new_alerts.push(alert);
            }
            results.push(result);
        }

        let snapshot = HealthSnapshot::new(
            self.engine.overall_score(),
            self.alerts.active_alerts(),
            computed_at,
        );

        CycleReport {
            results,
            new_alerts,
            snapshot,
        }
    }

    pub fn engine(&self) -> &AnalyticsEngine {
        &self.engine
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }
}
