use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::version::Version;
use crate::error::ErrorEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    Idle,
    Checking,
    Downloading,
    Verifying,
    Applying,
    VerifyingPost,
    RollingBack,
}

impl UpdatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Checking => "checking",
            UpdatePhase::Downloading => "downloading",
            UpdatePhase::Verifying => "verifying",
            UpdatePhase::Applying => "applying",
            UpdatePhase::VerifyingPost => "verifying_post",
            UpdatePhase::RollingBack => "rolling_back",
        }
    }

    /// Phases in which the active release may already point at the candidate
    pub fn touches_active_release(&self) -> bool {
        matches!(
            self,
            UpdatePhase::Applying | UpdatePhase::VerifyingPost | UpdatePhase::RollingBack
        )
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-update progress, persisted after every phase change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateState {
    pub phase: UpdatePhase,
    pub current_version: Version,
    #[serde(default)]
    pub candidate_version: Option<Version>,
    /// Version to restore if the candidate turns out unhealthy
    #[serde(default)]
    pub previous_version: Option<Version>,
    #[serde(default)]
    pub last_error: Option<ErrorEvent>,
    #[serde(default)]
    pub health_confirmed: bool,
    /// When the candidate became the active release
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
}

impl UpdateState {
    pub fn idle(current_version: Version) -> Self {
        Self {
            phase: UpdatePhase::Idle,
            current_version,
            candidate_version: None,
            previous_version: None,
            last_error: None,
            health_confirmed: false,
            activated_at: None,
        }
    }
}

/// One entry of the update transition history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: UpdatePhase,
    pub to: UpdatePhase,
    pub version: Version,
    #[serde(default)]
    pub candidate: Option<Version>,
    pub at: DateTime<Utc>,
}
