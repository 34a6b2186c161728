use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::system_monitor::{AlertRule, AnalyticsConfig, RuleSet};
use crate::core::update::{RetryPolicy, UpdatePolicy};
use crate::error::{EdgeError, Result};
use crate::platform::write_atomic;

const APP_DIR: &str = "edgewatch";
const MAX_SAMPLING_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Identity reported in telemetry and `get_device_info`
    pub id: String,
    pub location: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: sysinfo::System::host_name().unwrap_or_else(|| "edge-device".to_string()),
            location: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_secs: u64,
    pub window_size: usize,
    pub min_samples: usize,
    /// Seconds a recovering metric must stay low before returning to normal
    pub recovery_dwell_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            window_size: 20,
            min_samples: 3,
            recovery_dwell_secs: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReleaseSourceConfig {
    Disabled,
    Manifest {
        url: String,
    },
    Github {
        repo: String,
        #[serde(default)]
        token: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub source: ReleaseSourceConfig,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub grace_window_secs: u64,
    pub grace_cycles: u32,
    pub rollback_floor: f64,
    /// Directory holding `releases/` and the `current` pointer
    pub install_root: Option<PathBuf>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 3600,
            source: ReleaseSourceConfig::Disabled,
            request_timeout_secs: 30,
            max_attempts: 4,
            initial_backoff_secs: 2,
            max_backoff_secs: 60,
            grace_window_secs: 150,
            grace_cycles: 4,
            rollback_floor: 50.0,
            install_root: None,
        }
    }
}

impl UpdateConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn policy(&self) -> UpdatePolicy {
        UpdatePolicy {
            grace_cycles: self.grace_cycles,
            grace_window: Duration::from_secs(self.grace_window_secs),
            rollback_floor: self.rollback_floor,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_secs(self.initial_backoff_secs),
                max_backoff: Duration::from_secs(self.max_backoff_secs),
                attempt_timeout: self.request_timeout(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Stdout,
    Http,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub sink: SinkKind,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Stdout,
            endpoint: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub device: DeviceConfig,
    pub sampling: SamplingConfig,
    /// Overrides on top of the per-metric defaults
    pub alert_rules: Vec<AlertRule>,
    pub update: UpdateConfig,
    pub telemetry: TelemetryConfig,
    pub state_path: Option<PathBuf>,
}

impl AgentConfig {
    /// Load from `path`, or the default location when `None`; a missing file yields defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            log::debug!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }

        let data = fs::read(&config_path)?;
        let config: AgentConfig = serde_json::from_slice(&data).map_err(|e| {
            EdgeError::config_validation(format!("{}: {}", config_path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| EdgeError::other("could not determine config directory"))?;
        Ok(config_dir.join(APP_DIR).join("config.json"))
    }

    fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| EdgeError::other("could not determine data directory"))?;
        Ok(data_dir.join(APP_DIR))
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("state.json")),
        }
    }

    pub fn install_root(&self) -> Result<PathBuf> {
        match &self.update.install_root {
            Some(path) => Ok(path.clone()),
            None => Self::data_dir(),
        }
    }

    /// Reject settings the agent cannot run with. Bad alert rules are not fatal;
    /// they fall back to defaults in [`AgentConfig::rule_set`].
    pub fn validate(&self) -> Result<()> {
        let s = &self.sampling;
        validate_interval(s.interval_secs)?;
        if s.window_size == 0 {
            return Err(EdgeError::config_validation("sampling.window_size must be at least 1"));
        }
        if s.min_samples == 0 || s.min_samples > s.window_size {
            return Err(EdgeError::config_validation(format!(
                "sampling.min_samples must be between 1 and window_size ({})",
                s.window_size
            )));
        }

        let u = &self.update;
        if u.check_interval_secs == 0 {
            return Err(EdgeError::config_validation("update.check_interval_secs must be positive"));
        }
        if u.grace_cycles == 0 || u.grace_window_secs == 0 {
            return Err(EdgeError::config_validation(
                "update.grace_cycles and update.grace_window_secs must be positive",
            ));
        }
        validate_grace_fit(
            Duration::from_secs(s.interval_secs),
            u.grace_cycles,
            Duration::from_secs(u.grace_window_secs),
        )?;
        if !(0.0..=100.0).contains(&u.rollback_floor) {
            return Err(EdgeError::config_validation(format!(
                "update.rollback_floor {} must be within 0-100",
                u.rollback_floor
            )));
        }
        if u.max_attempts == 0 || u.request_timeout_secs == 0 {
            return Err(EdgeError::config_validation(
                "update.max_attempts and update.request_timeout_secs must be positive",
            ));
        }
        match &u.source {
            ReleaseSourceConfig::Manifest { url } if url.trim().is_empty() => {
                return Err(EdgeError::config_validation("update.source.url is empty"));
            }
            ReleaseSourceConfig::Github { repo, .. } if repo.split('/').count() != 2 => {
                return Err(EdgeError::config_validation(format!(
                    "update.source.repo '{}' must look like owner/repo",
                    repo
                )));
            }
            _ => {}
        }

        if self.telemetry.sink == SinkKind::Http && self.telemetry.endpoint.is_none() {
            return Err(EdgeError::config_validation(
                "telemetry.endpoint is required for the http sink",
            ));
        }
        Ok(())
    }

    /// Active rules: defaults overridden by every valid configured rule
    pub fn rule_set(&self) -> RuleSet {
        let (rules, rejected) = RuleSet::from_rules(self.alert_rules.iter().copied());
        for err in rejected {
            log::warn!("Ignoring configured alert rule: {}", err);
        }
        rules
    }

    pub fn analytics_config(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            window_size: self.sampling.window_size,
            min_samples: self.sampling.min_samples,
        }
    }
}

fn validate_interval(secs: u64) -> Result<()> {
    if secs == 0 || secs > MAX_SAMPLING_INTERVAL_SECS {
        return Err(EdgeError::config_validation(format!(
            "sampling interval {}s must be between 1 and {}",
            secs, MAX_SAMPLING_INTERVAL_SECS
        )));
    }
    Ok(())
}

/// The post-update grace window must have room for `grace_cycles` samples
fn validate_grace_fit(interval: Duration, grace_cycles: u32, grace_window: Duration) -> Result<()> {
    let needed = interval.saturating_mul(grace_cycles);
    if needed > grace_window {
        return Err(EdgeError::config_validation(format!(
            "sampling interval {}s is too long: {} grace cycles need {}s but update.grace_window_secs is {}",
            interval.as_secs(),
            grace_cycles,
            needed.as_secs(),
            grace_window.as_secs()
        )));
    }
    Ok(())
}

/// Settings that can change while the agent runs
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub sampling_interval: Duration,
    pub rules: RuleSet,
    pub auto_update_enabled: bool,
    /// Fixed at startup; caps how far the sampling interval may grow
    pub grace_cycles: u32,
    pub grace_window: Duration,
}

impl RuntimeSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            sampling_interval: Duration::from_secs(config.sampling.interval_secs),
            rules: config.rule_set(),
            auto_update_enabled: config.update.enabled,
            grace_cycles: config.update.grace_cycles,
            grace_window: Duration::from_secs(config.update.grace_window_secs),
        }
    }

    /// Apply every valid field of `patch`; invalid fields keep their prior value
    pub fn apply_patch(&self, patch: &ConfigPatch) -> (RuntimeSettings, PatchReport) {
        let mut next = self.clone();
        let mut report = PatchReport::default();

        if let Some(secs) = patch.sampling_interval_secs {
            let checked = validate_interval(secs).and_then(|()| {
                validate_grace_fit(Duration::from_secs(secs), self.grace_cycles, self.grace_window)
            });
            match checked {
                Ok(()) => {
                    next.sampling_interval = Duration::from_secs(secs);
                    report.applied.push("sampling_interval_secs".to_string());
                }
                Err(e) => report.rejected.push(e.to_string()),
            }
        }

        if let Some(rules) = &patch.alert_rules {
            for rule in rules {
                match next.rules.apply(*rule) {
                    Ok(()) => report.applied.push(format!("alert_rules.{}", rule.metric)),
                    Err(e) => report.rejected.push(e.to_string()),
                }
            }
        }

        if let Some(enabled) = patch.auto_update_enabled {
            next.auto_update_enabled = enabled;
            report.applied.push("auto_update_enabled".to_string());
        }

        (next, report)
    }
}

/// Partial update received from the command surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub sampling_interval_secs: Option<u64>,
    pub alert_rules: Option<Vec<AlertRule>>,
    pub auto_update_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchReport {
    pub applied: Vec<String>,
    pub rejected: Vec<String>,
}

impl PatchReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}
