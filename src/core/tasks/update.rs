//! Update task: periodic checks plus on-demand triggers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::core::config::RuntimeSettings;
use crate::core::shutdown::ShutdownSignal;
use crate::core::update::{UpdateManager, UpdateOutcome, UpdateRequest};

/// Sole owner of the update state machine
pub async fn update_task(
    mut manager: UpdateManager,
    mut trigger: mpsc::Receiver<UpdateRequest>,
    settings: watch::Receiver<Arc<RuntimeSettings>>,
    check_interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    log::info!(
        "Update task started (check every {:?}, current version {})",
        check_interval,
        manager.state().current_version
    );

    // No scheduled check before the first interval has elapsed
    let mut ticker = interval_at(Instant::now() + check_interval, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let requested = tokio::select! {
            _ = ticker.tick() => None,
            Some(request) = trigger.recv() => Some(request),
            _ = shutdown.wait() => break,
        };

        let request = match requested {
            Some(request) => request,
            None if settings.borrow().auto_update_enabled => UpdateRequest::latest(),
            None => {
                log::debug!("Scheduled update check skipped, auto update disabled");
                continue;
            }
        };

        match manager.run_cycle_for(request).await {
            Ok(UpdateOutcome::UpToDate(version)) => log::debug!("No update beyond {}", version),
            Ok(outcome) => log::info!("Update cycle finished: {:?}", outcome),
            Err(e) => log::warn!("Update cycle failed: {}", e),
        }
    }

    log::info!("Update task stopped");
}
