use chrono::Utc;
use tempfile::tempdir;

use edgewatch::core::state_store::{PersistedState, StateStore};
use edgewatch::core::system_monitor::{Alert, AlertState, HealthSnapshot, MetricKind, Severity};
use edgewatch::core::update::{UpdatePhase, Version};
use edgewatch::EdgeError;

fn alert(i: usize) -> Alert {
    Alert {
        metric: MetricKind::Cpu,
        severity: Severity::Warning,
        state: AlertState::Warning,
        value: 80.0 + i as f64 * 0.01,
        timestamp: Utc::now(),
        message: format!("cpu warning #{}", i),
    }
}

#[test]
fn test_state_survives_reopen() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("state.json");

    {
        let (store, _) = StateStore::open(&path, Version::new(1, 0, 0)).unwrap();
        let mut update = store.update_state();
        update.phase = UpdatePhase::Checking;
        store.record_update(&update, UpdatePhase::Idle).unwrap();
        store.set_last_known_good("ABCDEF").unwrap();
        store
            .record_cycle(&HealthSnapshot::new(72.5, vec![], Utc::now()), &[alert(0)])
            .unwrap();
    }

    let (store, corruption) = StateStore::open(&path, Version::new(9, 9, 9)).unwrap();
    assert!(corruption.is_none());
    let state = store.snapshot();
    assert_eq!(state.update.phase, UpdatePhase::Checking);
    assert_eq!(state.update.current_version, Version::new(1, 0, 0));
    assert_eq!(state.last_known_good_checksum.as_deref(), Some("abcdef"));
    assert_eq!(state.last_health_check.map(|h| h.score), Some(72.5));
    assert_eq!(state.alert_history.len(), 1);
    assert_eq!(state.transitions.len(), 1);
}

#[test]
fn test_corrupt_state_is_moved_aside() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("state.json");
    std::fs::write(&path, b"{\"update\": {\"phase\": \"exploded\"").unwrap();

    let (store, corruption) = StateStore::open(&path, Version::new(3, 1, 0)).unwrap();

    assert!(matches!(corruption, Some(EdgeError::PersistenceCorruption(_))));
    assert!(temp.path().join("state.json.corrupt").exists());
    assert_eq!(store.update_state().phase, UpdatePhase::Idle);
    assert_eq!(store.update_state().current_version, Version::new(3, 1, 0));

    // The replacement was flushed and parses cleanly
    let reloaded = PersistedState::load(&path).unwrap();
    assert_eq!(reloaded.update.current_version, Version::new(3, 1, 0));
}
