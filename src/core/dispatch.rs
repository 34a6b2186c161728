//! Inbound command surface.
//!
//! Requests travel over an mpsc channel to the command task and are answered
//! through a oneshot with an HTTP-like status code and a JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::core::config::{ConfigPatch, DeviceConfig, RuntimeSettings};
use crate::core::state_store::StateStore;
use crate::core::system_monitor::{AnalyticsResult, HealthSnapshot};
use crate::core::update::{UpdatePhase, UpdateRequest, Version};
use crate::error::{EdgeError, Result};

const RECENT_TRANSITIONS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetDeviceInfo,
    TriggerUpdate,
    GetAnalytics,
    GetUpdateStatus,
    ConfigureAlerts(ConfigPatch),
    /// Install one named version; `force` allows reinstalling or downgrading
    UpdateFirmware { version: Version, force: bool },
}

#[derive(Debug, Deserialize)]
struct FirmwarePayload {
    version: String,
    #[serde(default)]
    force: bool,
}

impl Command {
    pub const METHODS: [&'static str; 6] = [
        "get_device_info",
        "trigger_update",
        "get_analytics",
        "get_update_status",
        "configure_alerts",
        "update_firmware",
    ];

    /// Map a method name and payload onto a command
    pub fn parse(method: &str, payload: Value) -> std::result::Result<Command, CommandResponse> {
        match method {
            "get_device_info" => Ok(Command::GetDeviceInfo),
            "trigger_update" => Ok(Command::TriggerUpdate),
            "get_analytics" => Ok(Command::GetAnalytics),
            "get_update_status" => Ok(Command::GetUpdateStatus),
            "configure_alerts" => {
                let payload = if payload.is_null() { json!({}) } else { payload };
                serde_json::from_value(payload)
                    .map(Command::ConfigureAlerts)
                    .map_err(|e| {
                        CommandResponse::bad_request(&EdgeError::config_validation(format!(
                            "invalid configuration patch: {}",
                            e
                        )))
                    })
            }
            "update_firmware" => {
                let payload: FirmwarePayload = serde_json::from_value(payload).map_err(|e| {
                    CommandResponse::bad_request(&EdgeError::invalid_version(format!(
                        "update_firmware needs {{\"version\": \"x.y.z\"}}: {}",
                        e
                    )))
                })?;
                let version = payload
                    .version
                    .parse::<Version>()
                    .map_err(|e| CommandResponse::bad_request(&e))?;
                Ok(Command::UpdateFirmware {
                    version,
                    force: payload.force,
                })
            }
            other => Err(CommandResponse::not_found(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub status: u16,
    pub payload: Value,
}

impl CommandResponse {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: 200,
            payload,
        }
    }

    pub fn bad_request(err: &EdgeError) -> Self {
        Self {
            status: 400,
            payload: json!({ "result": format!("Error: {}", err), "kind": err.kind() }),
        }
    }

    pub fn not_found(method: &str) -> Self {
        Self {
            status: 404,
            payload: json!({ "result": format!("Unknown method: {}", method) }),
        }
    }

    pub fn error(err: &EdgeError) -> Self {
        Self {
            status: 500,
            payload: json!({ "result": format!("Error: {}", err), "kind": err.kind() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct CommandRequest {
    pub method: String,
    pub payload: Value,
    pub reply: oneshot::Sender<CommandResponse>,
}

/// Cloneable client side of the command channel
#[derive(Debug, Clone)]
pub struct CommandHandle {
    tx: mpsc::Sender<CommandRequest>,
}

impl CommandHandle {
    pub fn new(tx: mpsc::Sender<CommandRequest>) -> Self {
        Self { tx }
    }

    pub async fn call(&self, method: &str, payload: Value) -> Result<CommandResponse> {
        let (reply, rx) = oneshot::channel();
        let request = CommandRequest {
            method: method.to_string(),
            payload,
            reply,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| EdgeError::cancelled("command task is not running"))?;
        rx.await
            .map_err(|_| EdgeError::cancelled("command task dropped the request"))
    }
}

/// Answers commands from shared state; the only writer of runtime settings
pub struct CommandDispatcher {
    device: DeviceConfig,
    store: Arc<StateStore>,
    health: watch::Receiver<Arc<HealthSnapshot>>,
    analytics: watch::Receiver<Arc<Vec<AnalyticsResult>>>,
    settings: watch::Sender<Arc<RuntimeSettings>>,
    update_trigger: mpsc::Sender<UpdateRequest>,
}

impl CommandDispatcher {
    pub fn new(
        device: DeviceConfig,
        store: Arc<StateStore>,
        health: watch::Receiver<Arc<HealthSnapshot>>,
        analytics: watch::Receiver<Arc<Vec<AnalyticsResult>>>,
        settings: watch::Sender<Arc<RuntimeSettings>>,
        update_trigger: mpsc::Sender<UpdateRequest>,
    ) -> Self {
        Self {
            device,
            store,
            health,
            analytics,
            settings,
            update_trigger,
        }
    }

    pub fn handle(&self, method: &str, payload: Value) -> CommandResponse {
        log::info!("Received method call: {}", method);
        let command = match Command::parse(method, payload) {
            Ok(command) => command,
            Err(response) => return response,
        };

        match self.execute(command) {
            Ok(payload) => CommandResponse::ok(payload),
            Err(e) => {
                log::error!("Error handling method {}: {}", method, e);
                CommandResponse::error(&e)
            }
        }
    }

    fn execute(&self, command: Command) -> Result<Value> {
        match command {
            Command::GetDeviceInfo => Ok(self.device_info()),
            Command::TriggerUpdate => self.trigger_update(),
            Command::GetAnalytics => Ok(self.analytics()),
            Command::GetUpdateStatus => self.update_status(),
            Command::ConfigureAlerts(patch) => self.configure(&patch),
            Command::UpdateFirmware { version, force } => self.update_firmware(version, force),
        }
    }

    fn device_info(&self) -> Value {
        let health = self.health.borrow().clone();
        let update = self.store.update_state();
        json!({
            "device_id": self.device.id,
            "location": self.device.location,
            "hostname": sysinfo::System::host_name(),
            "os": sysinfo::System::long_os_version(),
            "arch": std::env::consts::ARCH,
            "agent_version": Version::current(),
            "current_version": update.current_version,
            "update_phase": update.phase,
            "health": &*health,
            "status": health.status_label(),
        })
    }

    /// Hand a request to the update task; `false` when one is already queued
    fn queue_update(&self, request: UpdateRequest) -> Result<bool> {
        match self.update_trigger.try_send(request) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(EdgeError::other("update task is not running"))
            }
        }
    }

    fn trigger_update(&self) -> Result<Value> {
        if self.queue_update(UpdateRequest::latest())? {
            Ok(json!({ "result": "Update check scheduled" }))
        } else {
            Ok(json!({ "result": "Update check already pending" }))
        }
    }

    fn update_firmware(&self, version: Version, force: bool) -> Result<Value> {
        let current = self.store.update_state().current_version;
        if version == current && !force {
            log::info!("Firmware {} already installed, skipping", version);
            return Ok(json!({
                "status": "skipped",
                "result": format!("Already running {}", current),
                "current_version": current,
            }));
        }

        let status = if self.queue_update(UpdateRequest::pinned(version, force))? {
            log::info!("Firmware update to {} requested (force: {})", version, force);
            "initiated"
        } else {
            "pending"
        };
        Ok(json!({
            "status": status,
            "current_version": current,
            "target_version": version,
            "force": force,
        }))
    }

    fn analytics(&self) -> Value {
        let results = self.analytics.borrow().clone();
        let health = self.health.borrow().clone();
        json!({
            "results": &*results,
            "overall_score": health.overall_score,
            "active_alerts": health.contributing_alerts,
            "computed_at": health.computed_at,
        })
    }

    fn update_status(&self) -> Result<Value> {
        let state = self.store.snapshot();
        let last_check = state
            .transitions
            .iter()
            .rev()
            .find(|t| t.to == UpdatePhase::Checking)
            .map(|t| t.at);
        Ok(json!({
            "state": state.update,
            "update_in_progress": state.update.phase != UpdatePhase::Idle,
            "auto_update_enabled": self.settings.borrow().auto_update_enabled,
            "last_check": last_check,
            "transitions": self.store.recent_transitions(RECENT_TRANSITIONS),
            "last_known_good_checksum": state.last_known_good_checksum,
            "last_health_check": state.last_health_check,
        }))
    }

    fn configure(&self, patch: &ConfigPatch) -> Result<Value> {
        let current = self.settings.borrow().clone();
        let (next, report) = current.apply_patch(patch);
        for rejected in &report.rejected {
            log::warn!("Rejected configuration change: {}", rejected);
        }

        let result = if report.is_clean() {
            "Configuration updated"
        } else {
            "Configuration partially applied"
        };
        let thresholds = next.rules.to_vec();
        let interval = next.sampling_interval.as_secs();
        let auto_update = next.auto_update_enabled;
        if next != *current {
            self.settings.send_replace(Arc::new(next));
        }

        Ok(json!({
            "result": result,
            "applied": report.applied,
            "rejected": report.rejected,
            "thresholds": thresholds,
            "sampling_interval_secs": interval,
            "auto_update_enabled": auto_update,
        }))
    }
}
