use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alerts::{Alert, Severity};

/// Aggregate device condition, rebuilt once per sampling cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// 0 (failing) to 100 (nominal)
    pub overall_score: f64,
    pub contributing_alerts: Vec<Alert>,
    pub computed_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn new(overall_score: f64, contributing_alerts: Vec<Alert>, computed_at: DateTime<Utc>) -> Self {
        let overall_score = if overall_score.is_finite() {
            overall_score.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            overall_score,
            contributing_alerts,
            computed_at,
        }
    }

    /// Snapshot published before the first sampling cycle completes
    pub fn nominal() -> Self {
        Self::new(100.0, Vec::new(), Utc::now())
    }

    pub fn has_critical(&self) -> bool {
        self.contributing_alerts
            .iter()
            .any(|a| a.severity == Severity::Critical)
    }

    /// Critical alerts raised at or after `since`
    pub fn critical_since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &Alert> {
        self.contributing_alerts
            .iter()
            .filter(move |a| a.severity == Severity::Critical && a.timestamp >= since)
    }

    /// Human label used by the status command and telemetry
    pub fn status_label(&self) -> &'static str {
        if self.overall_score >= 80.0 {
            "excellent"
        } else if self.overall_score >= 60.0 {
            "good"
        } else {
            "needs_attention"
        }
    }
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self::nominal()
    }
}
