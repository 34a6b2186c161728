//! Outbound telemetry: one JSON payload per sampling cycle.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::core::system_monitor::{Alert, AnalyticsResult, HealthSnapshot};
use crate::error::{EdgeError, ErrorEvent, Result};

pub const ERROR_QUEUE_LIMIT: usize = 50;

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, payload: Map<String, Value>) -> Result<()>;
}

/// Writes each payload as one JSON line on stdout
pub struct StdoutSink;

#[async_trait]
impl TelemetrySink for StdoutSink {
    async fn publish(&self, payload: Map<String, Value>) -> Result<()> {
        let line = serde_json::to_string(&payload)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        Ok(())
    }
}

/// POSTs each payload as JSON to an HTTP endpoint
pub struct HttpSink {
    client: Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("edgewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EdgeError::http(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn publish(&self, payload: Map<String, Value>) -> Result<()> {
        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(if status.is_server_error() {
                EdgeError::transient(format!("telemetry endpoint returned {}", status))
            } else {
                EdgeError::http(format!("telemetry endpoint returned {}", status))
            });
        }
        Ok(())
    }
}

/// Sink that keeps payloads in memory
#[derive(Default, Clone)]
pub struct MemorySink {
    payloads: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<Map<String, Value>> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn publish(&self, payload: Map<String, Value>) -> Result<()> {
        self.payloads.lock().push(payload);
        Ok(())
    }
}

/// Error events waiting to ride along with the next telemetry payload
#[derive(Debug, Clone, Default)]
pub struct ErrorQueue {
    events: Arc<Mutex<VecDeque<ErrorEvent>>>,
}

impl ErrorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ErrorEvent) {
        let mut events = self.events.lock();
        if events.len() >= ERROR_QUEUE_LIMIT {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn record(&self, err: &EdgeError) {
        self.push(ErrorEvent::new(err));
    }

    pub fn drain(&self) -> Vec<ErrorEvent> {
        self.events.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Assemble the per-cycle payload
pub fn build_payload(
    device_id: &str,
    results: &[AnalyticsResult],
    new_alerts: &[Alert],
    health: &HealthSnapshot,
    errors: &[ErrorEvent],
) -> Map<String, Value> {
    let metrics: Map<String, Value> = results
        .iter()
        .map(|r| {
            (
                r.metric.as_str().to_string(),
                json!({
                    "value": r.value,
                    "moving_average": r.moving_average,
                    "std_dev": r.std_dev,
                    "z_score": r.z_score,
                    "trend": r.trend,
                    "trend_slope": r.trend_slope,
                    "health_contribution": r.health_contribution,
                    "warm": r.warm,
                }),
            )
        })
        .collect();

    let mut payload = Map::new();
    payload.insert("device_id".to_string(), json!(device_id));
    payload.insert("timestamp".to_string(), json!(Utc::now()));
    payload.insert("metrics".to_string(), Value::Object(metrics));
    payload.insert("alerts".to_string(), json!(new_alerts));
    payload.insert(
        "health".to_string(),
        json!({
            "score": health.overall_score,
            "status": health.status_label(),
            "active_alerts": health.contributing_alerts.len(),
            "computed_at": health.computed_at,
        }),
    );
    if !errors.is_empty() {
        payload.insert("errors".to_string(), json!(errors));
    }
    payload
}
