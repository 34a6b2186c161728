//! Sampling task: collect, analyze, alert, publish.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::core::config::RuntimeSettings;
use crate::core::shutdown::ShutdownSignal;
use crate::core::state_store::StateStore;
use crate::core::system_monitor::{AnalyticsResult, HealthSnapshot, MonitorPipeline, SampleSource};
use crate::core::telemetry::{build_payload, ErrorQueue, TelemetrySink};

/// Everything the sampling task owns or publishes to
pub struct SamplingContext {
    pub device_id: String,
    pub source: Box<dyn SampleSource>,
    pub pipeline: MonitorPipeline,
    pub settings: watch::Receiver<Arc<RuntimeSettings>>,
    pub health_tx: watch::Sender<Arc<HealthSnapshot>>,
    pub analytics_tx: watch::Sender<Arc<Vec<AnalyticsResult>>>,
    pub sink: Option<Arc<dyn TelemetrySink>>,
    pub errors: ErrorQueue,
    pub store: Arc<StateStore>,
    pub publish_timeout: Duration,
}

fn make_ticker(period: Duration, start: Instant) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl SamplingContext {
    async fn run_cycle(&mut self) {
        let samples = match self.source.collect() {
            Ok(samples) => samples,
            Err(e) => {
                log::error!("Sample collection failed: {}", e);
                self.errors.record(&e);
                return;
            }
        };

        let settings = self.settings.borrow().clone();
        let report = self.pipeline.process(samples, &settings.rules, Utc::now());

        self.analytics_tx
            .send_replace(Arc::new(self.pipeline.engine().latest()));
        self.health_tx.send_replace(Arc::new(report.snapshot.clone()));

        log::debug!(
            "Sampling cycle: score {:.1}, {} new alerts",
            report.snapshot.overall_score,
            report.new_alerts.len()
        );

        if let Err(e) = self.store.record_cycle(&report.snapshot, &report.new_alerts) {
            log::error!("Failed to persist sampling cycle: {}", e);
            self.errors.record(&e);
        }

        let Some(sink) = &self.sink else {
            return;
        };

        let errors = self.errors.drain();
        let payload = build_payload(
            &self.device_id,
            &report.results,
            &report.new_alerts,
            &report.snapshot,
            &errors,
        );

        let failure = match tokio::time::timeout(self.publish_timeout, sink.publish(payload)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {:?}", self.publish_timeout)),
        };

        if let Some(reason) = failure {
            log::warn!("Telemetry publish failed: {}", reason);
            // Keep the events for the next payload
            for event in errors {
                self.errors.push(event);
            }
        }
    }
}

pub async fn sampling_task(mut ctx: SamplingContext, mut shutdown: ShutdownSignal) {
    log::info!("Sampling task started");

    let mut period = ctx.settings.borrow().sampling_interval;
    let mut ticker = make_ticker(period, Instant::now());
    let mut settings_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ctx.run_cycle().await;
            }
            changed = ctx.settings.changed(), if settings_open => {
                if changed.is_err() {
                    settings_open = false;
                    continue;
                }
                let next = ctx.settings.borrow_and_update().sampling_interval;
                if next != period {
                    log::info!("Sampling interval changed from {:?} to {:?}", period, next);
                    period = next;
                    ticker = ticker_after(period);
                }
            }
            _ = shutdown.wait() => {
                break;
            }
        }
    }

    log::info!("Sampling task stopped");
}

fn ticker_after(period: Duration) -> Interval {
    make_ticker(period, Instant::now() + period)
}
