use async_trait::async_trait;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use edgewatch::core::checksum_manager::ChecksumManager;
use edgewatch::core::shutdown::{self, ShutdownTrigger};
use edgewatch::core::state_store::StateStore;
use edgewatch::core::system_monitor::{Alert, AlertState, HealthSnapshot, MetricKind, Severity};
use edgewatch::core::update::{
    FileStager, ReleaseSource, Stager, UpdateManager, UpdateManifest, UpdateOutcome, UpdatePhase,
    UpdatePolicy, Version,
};
use edgewatch::Result;

/// Release source whose advertised build can be swapped between cycles
struct SwappableSource {
    release: Mutex<(UpdateManifest, Vec<u8>)>,
}

impl SwappableSource {
    fn new(version: &str) -> Self {
        Self {
            release: Mutex::new(release(version)),
        }
    }

    fn publish(&self, version: &str) {
        *self.release.lock() = release(version);
    }
}

#[async_trait]
impl ReleaseSource for SwappableSource {
    async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        Ok(self.release.lock().0.clone())
    }

    async fn download(&self, _manifest: &UpdateManifest) -> Result<Vec<u8>> {
        Ok(self.release.lock().1.clone())
    }
}

fn tarball(version: &str) -> Vec<u8> {
    let contents = format!("#!/bin/sh\necho edgewatch {}\n", version);
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "edgewatch", contents.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn release(version: &str) -> (UpdateManifest, Vec<u8>) {
    let artifact = tarball(version);
    let manifest = UpdateManifest {
        version: version.parse().unwrap(),
        download_url: format!(
            "https://updates.example.invalid/{}/edgewatch-x86_64-unknown-linux-gnu.tar.gz",
            version
        ),
        checksum: ChecksumManager::calculate_bytes(&artifact),
    };
    (manifest, artifact)
}

struct Harness {
    _temp: TempDir,
    store: Arc<StateStore>,
    stager: Arc<FileStager>,
    source: Arc<SwappableSource>,
    manager: UpdateManager,
    feeder: JoinHandle<()>,
    shutdown: ShutdownTrigger,
}

/// What the device reports while a new release is being verified
#[derive(Debug, Clone, Copy, PartialEq)]
enum AfterActivation {
    Healthy,
    LowScore,
    /// Score stays high but a fresh critical alert appears
    CriticalAlert,
    Silent,
}

fn critical_disk_alert() -> Alert {
    Alert {
        metric: MetricKind::Disk,
        severity: Severity::Critical,
        state: AlertState::Critical,
        value: 97.5,
        timestamp: Utc::now(),
        message: "disk at 97.5%".to_string(),
    }
}

/// Feeds a health snapshot every 20ms, healthy until the candidate is being
/// verified and then as `after` describes
fn harness(version: &str, after: AfterActivation) -> Harness {
    let temp = tempdir().unwrap();
    let (store, corruption) =
        StateStore::open(temp.path().join("state.json"), Version::new(1, 0, 0)).unwrap();
    assert!(corruption.is_none());
    let store = Arc::new(store);
    let stager = Arc::new(FileStager::new(temp.path().join("install")));
    let source = Arc::new(SwappableSource::new(version));

    let (health_tx, health_rx) = watch::channel(Arc::new(HealthSnapshot::nominal()));
    let (trigger, signal) = shutdown::channel();

    let feeder_store = Arc::clone(&store);
    let feeder = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        loop {
            ticker.tick().await;
            let verifying = feeder_store.update_state().phase == UpdatePhase::VerifyingPost;
            let snapshot = match (verifying, after) {
                (true, AfterActivation::Silent) => continue,
                (true, AfterActivation::LowScore) => HealthSnapshot::new(30.0, vec![], Utc::now()),
                (true, AfterActivation::CriticalAlert) => {
                    HealthSnapshot::new(90.0, vec![critical_disk_alert()], Utc::now())
                }
                _ => HealthSnapshot::new(95.0, vec![], Utc::now()),
            };
            if health_tx.send(Arc::new(snapshot)).is_err() {
                break;
            }
        }
    });

    let policy = UpdatePolicy {
        grace_cycles: 3,
        grace_window: Duration::from_secs(5),
        ..UpdatePolicy::default()
    };
    let manager = UpdateManager::new(
        source.clone(),
        stager.clone(),
        store.clone(),
        health_rx,
        signal,
        policy,
    );

    Harness {
        _temp: temp,
        store,
        stager,
        source,
        manager,
        feeder,
        shutdown: trigger,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_healthy_update_is_confirmed() {
    let mut h = harness("2.0.0", AfterActivation::Healthy);

    let outcome = h.manager.run_cycle().await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            from: Version::new(1, 0, 0),
            to: Version::new(2, 0, 0),
        }
    );

    let state = h.store.snapshot();
    assert_eq!(state.update.phase, UpdatePhase::Idle);
    assert_eq!(state.update.current_version, Version::new(2, 0, 0));
    assert!(state.update.health_confirmed);
    assert_eq!(
        state.last_known_good_checksum,
        Some(h.source.release.lock().0.checksum.clone())
    );
    assert_eq!(h.stager.active_version().unwrap(), Some(Version::new(2, 0, 0)));
    assert!(h
        .stager
        .release_dir(&Version::new(2, 0, 0))
        .join("edgewatch")
        .is_file());

    let phases: Vec<UpdatePhase> = state.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        phases,
        vec![
            UpdatePhase::Checking,
            UpdatePhase::Downloading,
            UpdatePhase::Verifying,
            UpdatePhase::Applying,
            UpdatePhase::VerifyingPost,
            UpdatePhase::Idle,
        ]
    );

    h.feeder.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_degraded_health_rolls_back() {
    let mut h = harness("2.0.0", AfterActivation::LowScore);

    let outcome = h.manager.run_cycle().await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::RolledBack {
            attempted: Version::new(2, 0, 0),
            restored: Version::new(1, 0, 0),
        }
    );

    let state = h.store.snapshot();
    assert_eq!(state.update.phase, UpdatePhase::Idle);
    assert_eq!(state.update.current_version, Version::new(1, 0, 0));
    assert_eq!(
        state.update.last_error.as_ref().map(|e| e.kind.as_str()),
        Some("health_degraded")
    );
    assert!(state
        .transitions
        .iter()
        .any(|t| t.to == UpdatePhase::RollingBack));
    assert!(state.last_known_good_checksum.is_none());
    assert_eq!(h.stager.active_version().unwrap(), None);
    assert!(!h.stager.is_staged(&Version::new(2, 0, 0)));

    h.feeder.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_successive_updates_keep_current_and_previous() {
    let mut h = harness("2.0.0", AfterActivation::Healthy);

    for next in ["3.0.0", "4.0.0"] {
        assert!(matches!(
            h.manager.run_cycle().await.unwrap(),
            UpdateOutcome::Updated { .. }
        ));
        h.source.publish(next);
    }
    let outcome = h.manager.run_cycle().await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            from: Version::new(3, 0, 0),
            to: Version::new(4, 0, 0),
        }
    );
    assert!(!h.stager.is_staged(&Version::new(2, 0, 0)));
    assert!(h.stager.is_staged(&Version::new(3, 0, 0)));
    assert!(h.stager.is_staged(&Version::new(4, 0, 0)));
    assert_eq!(h.stager.active_version().unwrap(), Some(Version::new(4, 0, 0)));

    // Nothing newer published
    let outcome = h.manager.run_cycle().await.unwrap();
    assert_eq!(outcome, UpdateOutcome::UpToDate(Version::new(4, 0, 0)));

    h.feeder.abort();
}

fn assert_restored_to_base(h: &Harness, error_kind: &str) {
    let state = h.store.snapshot();
    assert_eq!(state.update.phase, UpdatePhase::Idle);
    assert_eq!(state.update.current_version, Version::new(1, 0, 0));
    assert!(!state.update.health_confirmed);
    assert_eq!(
        state.update.last_error.as_ref().map(|e| e.kind.as_str()),
        Some(error_kind)
    );
    assert!(state.last_known_good_checksum.is_none());
    assert_eq!(h.stager.active_version().unwrap(), None);
    assert!(!h.stager.is_staged(&Version::new(2, 0, 0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_critical_alert_during_grace_rolls_back_above_floor() {
    let mut h = harness("2.0.0", AfterActivation::CriticalAlert);

    let outcome = h.manager.run_cycle().await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::RolledBack {
            attempted: Version::new(2, 0, 0),
            restored: Version::new(1, 0, 0),
        }
    );
    assert_restored_to_base(&h, "health_degraded");
    let message = h.store.update_state().last_error.unwrap().message;
    assert!(message.contains("critical alert after update"), "{}", message);

    h.feeder.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_during_grace_commits_rollback() {
    let mut h = harness("2.0.0", AfterActivation::Silent);

    let watcher_store = Arc::clone(&h.store);
    let trigger = h.shutdown.clone();
    let watcher = tokio::spawn(async move {
        while watcher_store.update_state().phase != UpdatePhase::VerifyingPost {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.trigger();
    });

    let outcome = h.manager.run_cycle().await.unwrap();
    watcher.await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::RolledBack {
            attempted: Version::new(2, 0, 0),
            restored: Version::new(1, 0, 0),
        }
    );
    assert_restored_to_base(&h, "cancelled");
    assert!(h
        .store
        .snapshot()
        .transitions
        .iter()
        .any(|t| t.from == UpdatePhase::VerifyingPost && t.to == UpdatePhase::RollingBack));

    h.feeder.abort();
}
