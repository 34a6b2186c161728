use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::sync::watch;

use edgewatch::core::shutdown;
use edgewatch::core::state_store::{PersistedState, StateStore};
use edgewatch::core::system_monitor::HealthSnapshot;
use edgewatch::core::update::{
    FileStager, ReleaseSource, Stager, UpdateManager, UpdateManifest, UpdateOutcome, UpdatePhase,
    UpdatePolicy, Version,
};
use edgewatch::{EdgeError, Result};

struct Unreachable;

#[async_trait]
impl ReleaseSource for Unreachable {
    async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        Err(EdgeError::transient("offline"))
    }

    async fn download(&self, _manifest: &UpdateManifest) -> Result<Vec<u8>> {
        Err(EdgeError::transient("offline"))
    }
}

fn v(s: &str) -> Version {
    s.parse().unwrap()
}

/// Write a state file as if the agent died mid-update
fn crashed_state(path: &Path, phase: UpdatePhase, current: &str, candidate: &str, previous: &str) {
    let mut state = PersistedState::new(v(current));
    state.update.phase = phase;
    state.update.candidate_version = Some(v(candidate));
    state.update.previous_version = Some(v(previous));
    if phase == UpdatePhase::VerifyingPost {
        state.update.activated_at = Some(Utc::now());
    }
    std::fs::write(path, serde_json::to_vec_pretty(&state).unwrap()).unwrap();
}

fn stage(stager: &FileStager, version: &str) {
    stager
        .stage(&v(version), "edgewatch.bin", version.as_bytes())
        .unwrap();
}

fn manager_for(temp: &TempDir, stager: Arc<FileStager>) -> (UpdateManager, Arc<StateStore>) {
    let (store, corruption) = StateStore::open(temp.path().join("state.json"), v("0.1.0")).unwrap();
    assert!(corruption.is_none());
    let store = Arc::new(store);
    let (_health_tx, health_rx) = watch::channel(Arc::new(HealthSnapshot::nominal()));
    let (_trigger, signal) = shutdown::channel();
    let manager = UpdateManager::new(
        Arc::new(Unreachable),
        stager,
        store.clone(),
        health_rx,
        signal,
        UpdatePolicy::default(),
    );
    (manager, store)
}

#[test]
fn test_crash_during_apply_restores_base_install() {
    let temp = tempdir().unwrap();
    let stager = Arc::new(FileStager::new(temp.path().join("install")));
    stage(&stager, "2.0.0");
    stager.activate(&v("2.0.0")).unwrap();
    crashed_state(
        &temp.path().join("state.json"),
        UpdatePhase::Applying,
        "1.0.0",
        "2.0.0",
        "1.0.0",
    );

    let (mut manager, store) = manager_for(&temp, stager.clone());
    let outcome = manager.recover().unwrap();

    assert_eq!(
        outcome,
        Some(UpdateOutcome::RolledBack {
            attempted: v("2.0.0"),
            restored: v("1.0.0"),
        })
    );
    let state = store.update_state();
    assert_eq!(state.phase, UpdatePhase::Idle);
    assert_eq!(state.current_version, v("1.0.0"));
    assert_eq!(state.candidate_version, None);
    // 1.0.0 was never staged, so the pointer goes away
    assert_eq!(stager.active_version().unwrap(), None);
    assert!(!stager.is_staged(&v("2.0.0")));
}

#[test]
fn test_crash_during_grace_reactivates_staged_previous() {
    let temp = tempdir().unwrap();
    let stager = Arc::new(FileStager::new(temp.path().join("install")));
    stage(&stager, "1.5.0");
    stage(&stager, "2.0.0");
    stager.activate(&v("2.0.0")).unwrap();
    crashed_state(
        &temp.path().join("state.json"),
        UpdatePhase::VerifyingPost,
        "2.0.0",
        "2.0.0",
        "1.5.0",
    );

    let (mut manager, store) = manager_for(&temp, stager.clone());
    manager.recover().unwrap();

    assert_eq!(store.update_state().current_version, v("1.5.0"));
    assert_eq!(stager.active_version().unwrap(), Some(v("1.5.0")));
    assert!(!stager.is_staged(&v("2.0.0")));

    let last = store.recent_transitions(2);
    assert_eq!(last.len(), 2);
    assert_eq!(last[0].to, UpdatePhase::RollingBack);
    assert_eq!(last[1].to, UpdatePhase::Idle);
}

#[test]
fn test_crash_before_apply_leaves_release_untouched() {
    let temp = tempdir().unwrap();
    let stager = Arc::new(FileStager::new(temp.path().join("install")));
    stage(&stager, "1.0.0");
    stager.activate(&v("1.0.0")).unwrap();
    crashed_state(
        &temp.path().join("state.json"),
        UpdatePhase::Downloading,
        "1.0.0",
        "2.0.0",
        "0.9.0",
    );

    let (mut manager, store) = manager_for(&temp, stager.clone());
    let outcome = manager.recover().unwrap();

    assert!(matches!(outcome, Some(UpdateOutcome::RolledBack { .. })));
    assert_eq!(store.update_state().current_version, v("1.0.0"));
    assert_eq!(stager.active_version().unwrap(), Some(v("1.0.0")));
}

#[test]
fn test_confirmed_update_is_closed_not_rolled_back() {
    let temp = tempdir().unwrap();
    let stager = Arc::new(FileStager::new(temp.path().join("install")));
    stage(&stager, "2.0.0");
    stager.activate(&v("2.0.0")).unwrap();

    let mut state = PersistedState::new(v("2.0.0"));
    state.update.phase = UpdatePhase::VerifyingPost;
    state.update.previous_version = Some(v("1.0.0"));
    state.update.health_confirmed = true;
    std::fs::write(
        temp.path().join("state.json"),
        serde_json::to_vec(&state).unwrap(),
    )
    .unwrap();

    let (mut manager, store) = manager_for(&temp, stager.clone());
    assert_eq!(manager.recover().unwrap(), None);

    let state = store.update_state();
    assert_eq!(state.phase, UpdatePhase::Idle);
    assert_eq!(state.current_version, v("2.0.0"));
    assert_eq!(stager.active_version().unwrap(), Some(v("2.0.0")));
}

#[test]
fn test_idle_state_needs_no_recovery() {
    let temp = tempdir().unwrap();
    let stager = Arc::new(FileStager::new(temp.path().join("install")));
    let (mut manager, store) = manager_for(&temp, stager);

    assert_eq!(manager.recover().unwrap(), None);
    assert!(store.recent_transitions(10).is_empty());
}
