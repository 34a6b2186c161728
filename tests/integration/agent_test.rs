use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use edgewatch::core::checksum_manager::ChecksumManager;
use edgewatch::core::config::{AgentConfig, SinkKind};
use edgewatch::core::runtime::Agent;
use edgewatch::core::state_store::{PersistedState, StateStore};
use edgewatch::core::system_monitor::{MetricKind, Sample, SampleSource};
use edgewatch::core::telemetry::MemorySink;
use edgewatch::core::update::{
    FileStager, ReleaseSource, Stager, UpdateManifest, UpdateOutcome, UpdatePhase, Version,
};
use edgewatch::Result;

/// Quiet device: low, steady readings
struct SteadySource;

impl SampleSource for SteadySource {
    fn collect(&mut self) -> Result<Vec<Sample>> {
        Ok(vec![
            Sample::now(MetricKind::Cpu, 22.0),
            Sample::now(MetricKind::Memory, 41.0),
            Sample::now(MetricKind::Disk, 37.0),
        ])
    }
}

struct StaticSource {
    manifest: UpdateManifest,
    artifact: Vec<u8>,
}

impl StaticSource {
    fn new(version: &str) -> Self {
        let artifact = format!("edgewatch {}", version).into_bytes();
        Self {
            manifest: UpdateManifest {
                version: version.parse().unwrap(),
                download_url: "https://updates.example.invalid/edgewatch.bin".to_string(),
                checksum: ChecksumManager::calculate_bytes(&artifact),
            },
            artifact,
        }
    }
}

#[async_trait]
impl ReleaseSource for StaticSource {
    async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        Ok(self.manifest.clone())
    }

    async fn download(&self, _manifest: &UpdateManifest) -> Result<Vec<u8>> {
        Ok(self.artifact.clone())
    }
}

fn test_config(temp: &TempDir) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.device.id = "edge-test-01".to_string();
    config.sampling.interval_secs = 1;
    config.state_path = Some(temp.path().join("state.json"));
    config.update.install_root = Some(temp.path().join("install"));
    config.update.grace_cycles = 2;
    config.update.grace_window_secs = 10;
    config.telemetry.sink = SinkKind::Disabled;
    config
}

fn agent(temp: &TempDir, sink: &MemorySink) -> Agent {
    let config = test_config(temp);
    let stager = Arc::new(FileStager::new(temp.path().join("install")));
    Agent::new(config, Box::new(SteadySource), None, None, stager)
        .with_telemetry_sink(Arc::new(sink.clone()))
}

async fn wait_for_payload(sink: &MemorySink) {
    for _ in 0..100 {
        if !sink.payloads().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no telemetry payload published");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_publishes_and_answers_commands() {
    let temp = tempdir().unwrap();
    let sink = MemorySink::new();
    let running = agent(&temp, &sink).start().unwrap();
    let commands = running.commands();

    wait_for_payload(&sink).await;
    let payload = &sink.payloads()[0];
    assert_eq!(payload["device_id"], json!("edge-test-01"));
    assert!(payload["metrics"]["cpu"].is_object());

    let info = commands.call("get_device_info", json!({})).await.unwrap();
    assert_eq!(info.status, 200);
    assert_eq!(info.payload["device_id"], json!("edge-test-01"));
    assert_eq!(info.payload["update_phase"], json!("idle"));

    let analytics = commands.call("get_analytics", json!(null)).await.unwrap();
    assert_eq!(analytics.status, 200);
    assert!(!analytics.payload["results"].as_array().unwrap().is_empty());

    let unknown = commands.call("reboot_device", json!({})).await.unwrap();
    assert_eq!(unknown.status, 404);

    // Self-update is not configured, so there is nobody to trigger
    let trigger = commands.call("trigger_update", json!({})).await.unwrap();
    assert_eq!(trigger.status, 500);

    let status = commands.call("get_update_status", json!({})).await.unwrap();
    assert_eq!(status.status, 200);
    assert_eq!(status.payload["state"]["phase"], json!("idle"));

    running.shutdown().await;

    let state = PersistedState::load(&temp.path().join("state.json")).unwrap();
    assert!(state.last_health_check.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configure_alerts_applies_valid_fields() {
    let temp = tempdir().unwrap();
    let sink = MemorySink::new();
    let running = agent(&temp, &sink).start().unwrap();
    let commands = running.commands();

    let response = commands
        .call(
            "configure_alerts",
            json!({
                "sampling_interval_secs": 2,
                "alert_rules": [
                    {"metric": "cpu", "warning_threshold": 60.0, "critical_threshold": 85.0, "hysteresis_margin": 5.0},
                    {"metric": "memory", "warning_threshold": 90.0, "critical_threshold": 80.0, "hysteresis_margin": 5.0}
                ]
            }),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.payload["result"], json!("Configuration partially applied"));
    assert_eq!(response.payload["sampling_interval_secs"], json!(2));
    assert_eq!(response.payload["rejected"].as_array().unwrap().len(), 1);

    let thresholds = response.payload["thresholds"].as_array().unwrap();
    let cpu = thresholds
        .iter()
        .find(|r| r["metric"] == json!("cpu"))
        .unwrap();
    assert_eq!(cpu["warning_threshold"], json!(60.0));

    let malformed = commands
        .call("configure_alerts", json!({"sampling_interval_secs": "fast"}))
        .await
        .unwrap();
    assert_eq!(malformed.status, 400);

    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_recovers_interrupted_update() {
    let temp = tempdir().unwrap();
    let stager = FileStager::new(temp.path().join("install"));
    stager
        .stage(&Version::new(2, 0, 0), "edgewatch.bin", b"2.0.0")
        .unwrap();
    stager.activate(&Version::new(2, 0, 0)).unwrap();

    let mut crashed = PersistedState::new(Version::new(2, 0, 0));
    crashed.update.phase = UpdatePhase::VerifyingPost;
    crashed.update.candidate_version = Some(Version::new(2, 0, 0));
    crashed.update.previous_version = Some(Version::new(1, 0, 0));
    std::fs::write(
        temp.path().join("state.json"),
        serde_json::to_vec(&crashed).unwrap(),
    )
    .unwrap();

    let sink = MemorySink::new();
    let running = agent(&temp, &sink).start().unwrap();
    let store: Arc<StateStore> = running.store();

    let state = store.update_state();
    assert_eq!(state.phase, UpdatePhase::Idle);
    assert_eq!(state.current_version, Version::new(1, 0, 0));
    assert_eq!(stager.active_version().unwrap(), None);

    // The recovery error rides along with the first payload
    wait_for_payload(&sink).await;
    let errors = sink.payloads()[0]["errors"].clone();
    assert_eq!(errors[0]["kind"], json!("health_degraded"));

    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_update_once_confirms_with_live_sampling() {
    let temp = tempdir().unwrap();
    let sink = MemorySink::new();
    let agent = agent(&temp, &sink).with_release_source(Arc::new(StaticSource::new("2.0.0")));

    let outcome = agent.check_update_once().await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            from: Version::current(),
            to: Version::new(2, 0, 0),
        }
    );
    let state = PersistedState::load(&temp.path().join("state.json")).unwrap();
    assert_eq!(state.update.current_version, Version::new(2, 0, 0));
    assert!(state.update.health_confirmed);
    assert!(state.last_known_good_checksum.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_firmware_installs_requested_version() {
    let temp = tempdir().unwrap();
    let sink = MemorySink::new();
    let running = agent(&temp, &sink)
        .with_release_source(Arc::new(StaticSource::new("2.0.0")))
        .start()
        .unwrap();
    let commands = running.commands();
    let store = running.store();
    wait_for_payload(&sink).await;

    let response = commands
        .call("update_firmware", json!({"version": "2.0.0"}))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.payload["status"], json!("initiated"));
    assert_eq!(response.payload["target_version"], json!("2.0.0"));

    let mut confirmed = false;
    for _ in 0..200 {
        let state = store.update_state();
        if state.phase == UpdatePhase::Idle && state.health_confirmed {
            assert_eq!(state.current_version, Version::new(2, 0, 0));
            confirmed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(confirmed, "pinned update never confirmed");

    let again = commands
        .call("update_firmware", json!({"version": "2.0.0"}))
        .await
        .unwrap();
    assert_eq!(again.payload["status"], json!("skipped"));

    let status = commands.call("get_update_status", json!({})).await.unwrap();
    assert!(status.payload["last_check"].is_string());

    running.shutdown().await;
}
