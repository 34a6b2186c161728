//! Self-update state machine.
//!
//! ```text
//! Idle -> Checking -> Downloading -> Verifying -> Applying -> VerifyingPost -> Idle
//!                                                                  |
//!                                                                  v
//!                                                             RollingBack -> Idle
//! ```
//!
//! Every phase change is persisted before the work of that phase starts, so a
//! restart can always tell whether the active release was confirmed healthy.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::platform_installer::Stager;
use super::release_info::{ReleaseSource, UpdateManifest};
use super::retry::{with_retry, RetryPolicy};
use super::state::{UpdatePhase, UpdateState};
use super::version::Version;
use crate::core::checksum_manager::ChecksumManager;
use crate::core::shutdown::ShutdownSignal;
use crate::core::state_store::StateStore;
use crate::core::system_monitor::HealthSnapshot;
use crate::core::telemetry::ErrorQueue;
use crate::error::{EdgeError, ErrorEvent, Result};

pub const DEFAULT_GRACE_CYCLES: u32 = 4;
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(150);
pub const DEFAULT_ROLLBACK_FLOOR: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdatePolicy {
    /// Health snapshots that must pass after activation
    pub grace_cycles: u32,
    /// Watchdog for the whole post-update observation
    pub grace_window: Duration,
    /// Minimum health score before and after an update
    pub rollback_floor: f64,
    pub retry: RetryPolicy,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            grace_cycles: DEFAULT_GRACE_CYCLES,
            grace_window: DEFAULT_GRACE_WINDOW,
            rollback_floor: DEFAULT_ROLLBACK_FLOOR,
            retry: RetryPolicy::default(),
        }
    }
}

/// How an update cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    UpToDate(Version),
    Updated { from: Version, to: Version },
    RolledBack { attempted: Version, restored: Version },
    /// Health gate refused to start the update
    Deferred(String),
    /// Shutdown arrived before anything was applied
    Cancelled,
}

/// What a single update cycle should aim for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Only install this version; anything else offered by the source is refused
    pub target: Option<Version>,
    /// Install even when the offered version is not newer than the current one
    pub force: bool,
}

impl UpdateRequest {
    /// Scheduled check: newest release, only when newer
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn pinned(target: Version, force: bool) -> Self {
        Self {
            target: Some(target),
            force,
        }
    }
}

pub struct UpdateManager {
    source: Arc<dyn ReleaseSource>,
    stager: Arc<dyn Stager>,
    store: Arc<StateStore>,
    errors: ErrorQueue,
    health: watch::Receiver<Arc<HealthSnapshot>>,
    shutdown: ShutdownSignal,
    policy: UpdatePolicy,
    state: UpdateState,
}

impl UpdateManager {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        stager: Arc<dyn Stager>,
        store: Arc<StateStore>,
        health: watch::Receiver<Arc<HealthSnapshot>>,
        shutdown: ShutdownSignal,
        policy: UpdatePolicy,
    ) -> Self {
        let state = store.update_state();
        Self {
            source,
            stager,
            store,
            errors: ErrorQueue::new(),
            health,
            shutdown,
            policy,
            state,
        }
    }

    /// Share an error queue with the telemetry path
    pub fn with_error_queue(mut self, errors: ErrorQueue) -> Self {
        self.errors = errors;
        self
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Move to `next` once the store has it on disk; on error the phase is unchanged
    fn transition(&mut self, next: UpdatePhase) -> Result<()> {
        let from = self.state.phase;
        let mut staged = self.state.clone();
        staged.phase = next;
        self.store.record_update(&staged, from)?;
        self.state.phase = next;
        if from != next {
            log::info!("Update phase {} -> {}", from, next);
        }
        Ok(())
    }

    fn record_error(&mut self, err: &EdgeError) {
        log::error!("Update error ({}): {}", err.kind(), err);
        self.state.last_error = Some(ErrorEvent::new(err));
        self.errors.record(err);
    }

    /// Resolve a phase left behind by a crash or power loss.
    ///
    /// Confirmed states are simply closed; anything else is rolled back to the
    /// previous version when the active release may have changed.
    pub fn recover(&mut self) -> Result<Option<UpdateOutcome>> {
        let phase = self.state.phase;
        if phase == UpdatePhase::Idle {
            return Ok(None);
        }

        if self.state.health_confirmed {
            log::info!("Closing confirmed update left in phase {}", phase);
            self.state.candidate_version = None;
            self.transition(UpdatePhase::Idle)?;
            return Ok(None);
        }

        log::warn!("Update interrupted in phase {}, rolling back", phase);
        let attempted = self
            .state
            .candidate_version
            .unwrap_or(self.state.current_version);

        if !phase.touches_active_release() {
            self.state.candidate_version = None;
            self.transition(UpdatePhase::RollingBack)?;
            self.transition(UpdatePhase::Idle)?;
            return Ok(Some(UpdateOutcome::RolledBack {
                attempted,
                restored: self.state.current_version,
            }));
        }

        let reason = EdgeError::health_degraded(format!(
            "update to {} interrupted during {} before health was confirmed",
            attempted, phase
        ));
        let restored = self.roll_back(&reason)?;
        Ok(Some(UpdateOutcome::RolledBack {
            attempted,
            restored,
        }))
    }

    /// Run one full check/download/apply/verify cycle for the newest release
    pub async fn run_cycle(&mut self) -> Result<UpdateOutcome> {
        self.run_cycle_for(UpdateRequest::latest()).await
    }

    /// Run one cycle for `request`.
    ///
    /// A phase left non-idle by an earlier failed cycle is resolved through
    /// [`recover`](Self::recover) before the new check starts.
    pub async fn run_cycle_for(&mut self, request: UpdateRequest) -> Result<UpdateOutcome> {
        if self.state.phase != UpdatePhase::Idle {
            log::warn!("Previous update cycle stopped in phase {}", self.state.phase);
            if let Some(outcome) = self.recover()? {
                log::warn!("Resolved unfinished update: {:?}", outcome);
            }
        }
        if self.shutting_down() {
            return Ok(UpdateOutcome::Cancelled);
        }

        self.transition(UpdatePhase::Checking)?;
        let manifest = match self.fetch_manifest().await {
            Ok(manifest) => manifest,
            Err(e) => return self.abandon(e),
        };

        if let Some(target) = request.target {
            if manifest.version != target {
                return self.abandon(EdgeError::invalid_version(format!(
                    "requested {} but the release source offers {}",
                    target, manifest.version
                )));
            }
        }

        let current = self.state.current_version;
        if manifest.version <= current && !request.force {
            log::info!("Up to date at {} (latest {})", current, manifest.version);
            self.transition(UpdatePhase::Idle)?;
            return Ok(UpdateOutcome::UpToDate(current));
        }

        if let Err(e) = self.pre_update_gate() {
            self.record_error(&e);
            self.transition(UpdatePhase::Idle)?;
            return Ok(UpdateOutcome::Deferred(e.to_string()));
        }

        let candidate = manifest.version;
        log::info!("Update available: {} -> {}", current, candidate);
        self.state.candidate_version = Some(candidate);
        self.transition(UpdatePhase::Downloading)?;

        let artifact = match self.download(&manifest).await {
            Ok(bytes) => bytes,
            Err(e) => return self.abandon(e),
        };

        self.transition(UpdatePhase::Verifying)?;
        let checksum = match ChecksumManager::verify_bytes(&artifact, &manifest.checksum) {
            Ok(hash) => hash,
            Err(e) => return self.abandon(e),
        };

        if self.shutting_down() {
            return self.abandon(EdgeError::cancelled("shutdown before applying update"));
        }

        // Past this point the cycle always runs to a safe state
        self.state.previous_version = Some(current);
        self.state.health_confirmed = false;
        self.transition(UpdatePhase::Applying)?;

        if let Err(e) = self.apply(&candidate, &manifest, &artifact) {
            if candidate != current {
                if let Err(cleanup) = self.stager.discard(&candidate) {
                    log::warn!("Failed to discard release {}: {}", candidate, cleanup);
                    self.errors.record(&cleanup);
                }
            }
            return self.abandon(e);
        }

        let activated_at = Utc::now();
        self.state.current_version = candidate;
        self.state.activated_at = Some(activated_at);
        if let Err(e) = self.transition(UpdatePhase::VerifyingPost) {
            let restored = self.roll_back(&e)?;
            return Ok(UpdateOutcome::RolledBack {
                attempted: candidate,
                restored,
            });
        }

        match self.observe_grace(activated_at).await {
            Ok(()) => {
                self.confirm(&checksum)?;
                Ok(UpdateOutcome::Updated {
                    from: current,
                    to: candidate,
                })
            }
            Err(e) => {
                let restored = self.roll_back(&e)?;
                Ok(UpdateOutcome::RolledBack {
                    attempted: candidate,
                    restored,
                })
            }
        }
    }

    async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        let source = Arc::clone(&self.source);
        let fetch = with_retry(&self.policy.retry, "manifest fetch", || {
            let source = Arc::clone(&source);
            async move { source.fetch_manifest().await }
        });
        self.until_shutdown(fetch).await
    }

    async fn download(&self, manifest: &UpdateManifest) -> Result<Vec<u8>> {
        let source = Arc::clone(&self.source);
        let fetch = with_retry(&self.policy.retry, "artifact download", || {
            let source = Arc::clone(&source);
            let manifest = manifest.clone();
            async move { source.download(&manifest).await }
        });
        self.until_shutdown(fetch).await
    }

    async fn until_shutdown<T>(&self, work: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            result = work => result,
            _ = shutdown.wait() => Err(EdgeError::cancelled("shutdown requested")),
        }
    }

    /// Refuse to start an update on a device that is already unhealthy
    fn pre_update_gate(&self) -> Result<()> {
        let snapshot = self.health.borrow().clone();
        if snapshot.overall_score < self.policy.rollback_floor {
            return Err(EdgeError::health_degraded(format!(
                "update deferred: health score {:.1} below floor {:.1}",
                snapshot.overall_score, self.policy.rollback_floor
            )));
        }
        if snapshot.has_critical() {
            return Err(EdgeError::health_degraded(
                "update deferred: critical alert active",
            ));
        }
        Ok(())
    }

    fn apply(&self, candidate: &Version, manifest: &UpdateManifest, artifact: &[u8]) -> Result<()> {
        self.stager
            .stage(candidate, manifest.artifact_name(), artifact)?;
        self.stager.activate(candidate)
    }

    /// Leave a cycle that never touched the active release
    fn abandon(&mut self, err: EdgeError) -> Result<UpdateOutcome> {
        self.state.candidate_version = None;

        if let EdgeError::Cancelled(reason) = &err {
            log::info!("Update cycle abandoned: {}", reason);
            self.transition(UpdatePhase::Idle)?;
            return Ok(UpdateOutcome::Cancelled);
        }

        self.record_error(&err);
        self.transition(UpdatePhase::Idle)?;
        Err(err)
    }

    async fn observe_grace(&self, activated_at: chrono::DateTime<Utc>) -> Result<()> {
        let mut health = self.health.clone();
        health.mark_unchanged();
        let mut shutdown = self.shutdown.clone();

        let deadline = Instant::now() + self.policy.grace_window;
        let required = self.policy.grace_cycles.max(1);
        let mut observed = 0;

        while observed < required {
            tokio::select! {
                changed = health.changed() => {
                    if changed.is_err() {
                        return Err(EdgeError::health_degraded("health feed closed during grace window"));
                    }
                    let snapshot = health.borrow_and_update().clone();
                    observed += 1;

                    if snapshot.overall_score < self.policy.rollback_floor {
                        return Err(EdgeError::health_degraded(format!(
                            "health score {:.1} below floor {:.1} after update",
                            snapshot.overall_score, self.policy.rollback_floor
                        )));
                    }
                    if let Some(alert) = snapshot.critical_since(activated_at).next() {
                        return Err(EdgeError::health_degraded(format!(
                            "critical alert after update: {}",
                            alert.message
                        )));
                    }
                    log::debug!(
                        "Grace check {}/{} passed (score {:.1})",
                        observed, required, snapshot.overall_score
                    );
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(EdgeError::health_degraded(format!(
                        "grace window expired after {} of {} health checks",
                        observed, required
                    )));
                }
                _ = shutdown.wait() => {
                    return Err(EdgeError::cancelled("shutdown during grace window"));
                }
            }
        }
        Ok(())
    }

    fn confirm(&mut self, checksum: &str) -> Result<()> {
        let current = self.state.current_version;
        self.state.health_confirmed = true;
        self.state.candidate_version = None;
        self.store.set_last_known_good(checksum)?;
        self.transition(UpdatePhase::Idle)?;
        log::info!("Update to {} confirmed healthy", current);

        let mut keep = vec![current];
        keep.extend(self.state.previous_version);
        match self.stager.prune(&keep) {
            Ok(removed) if !removed.is_empty() => {
                log::info!("Pruned old releases: {:?}", removed)
            }
            Ok(_) => {}
            Err(e) => log::warn!("Failed to prune old releases: {}", e),
        }
        Ok(())
    }

    /// Restore the previous release; returns the version now active
    fn roll_back(&mut self, reason: &EdgeError) -> Result<Version> {
        self.record_error(reason);
        if let Err(e) = self.transition(UpdatePhase::RollingBack) {
            // Restoring the previous release matters more than recording the phase
            log::error!("Could not persist rollback start: {}", e);
            self.errors.record(&e);
        }

        let failed = self
            .state
            .candidate_version
            .unwrap_or(self.state.current_version);

        if let Some(previous) = self.state.previous_version {
            let restore = if self.stager.is_staged(&previous) {
                self.stager.activate(&previous)
            } else {
                // Previous version is the base install, not a staged release
                self.stager.clear_active()
            };
            if let Err(e) = restore {
                log::error!("Failed to reactivate {}: {}", previous, e);
                self.errors.record(&e);
            }
            self.state.current_version = previous;

            if failed != previous {
                if let Err(e) = self.stager.discard(&failed) {
                    log::warn!("Failed to discard release {}: {}", failed, e);
                    self.errors.record(&e);
                }
            }
        } else {
            log::warn!("No previous version recorded; keeping {}", self.state.current_version);
        }

        self.state.candidate_version = None;
        self.state.health_confirmed = false;
        self.state.activated_at = None;
        self.transition(UpdatePhase::Idle)?;
        log::warn!("Rolled back to {}", self.state.current_version);
        Ok(self.state.current_version)
    }
}
