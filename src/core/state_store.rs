//! Durable agent state.
//!
//! One JSON document holds the update state machine, the last-known-good
//! checksum, the last health check and bounded alert and transition history.
//! Every mutation rewrites the file atomically.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::system_monitor::{Alert, HealthSnapshot};
use crate::core::update::{PhaseTransition, UpdatePhase, UpdateState, Version};
use crate::error::{EdgeError, Result};
use crate::platform::{move_aside, write_atomic};

pub const ALERT_HISTORY_LIMIT: usize = 100;
pub const TRANSITION_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub score: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub update: UpdateState,
    #[serde(default)]
    pub last_known_good_checksum: Option<String>,
    #[serde(default)]
    pub last_health_check: Option<HealthCheckRecord>,
    #[serde(default)]
    pub alert_history: VecDeque<Alert>,
    #[serde(default)]
    pub transitions: VecDeque<PhaseTransition>,
}

impl PersistedState {
    pub fn new(current_version: Version) -> Self {
        Self {
            update: UpdateState::idle(current_version),
            last_known_good_checksum: None,
            last_health_check: None,
            alert_history: VecDeque::new(),
            transitions: VecDeque::new(),
        }
    }

    /// Read and parse a state file without taking ownership of it
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| {
            EdgeError::persistence_corruption(format!("{}: {}", path.display(), e))
        })
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, limit: usize) {
    if queue.len() >= limit {
        queue.pop_front();
    }
    queue.push_back(item);
}

pub struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Open the store at `path`.
    ///
    /// A missing file yields an `Idle` state at `fallback_version`. An
    /// unparsable file is moved to `<path>.corrupt` and replaced the same way;
    /// the returned error describes the corruption for the event queue.
    pub fn open(path: impl Into<PathBuf>, fallback_version: Version) -> Result<(Self, Option<EdgeError>)> {
        let path = path.into();

        if !path.exists() {
            let store = Self::with_state(path, PersistedState::new(fallback_version));
            store.flush()?;
            return Ok((store, None));
        }

        match PersistedState::load(&path) {
            Ok(state) => Ok((Self::with_state(path, state), None)),
            Err(EdgeError::PersistenceCorruption(msg)) => {
                let moved = move_aside(&path, "corrupt")?;
                log::error!(
                    "State file is corrupt ({}); moved to {} and reset to idle at {}",
                    msg,
                    moved.display(),
                    fallback_version
                );
                let store = Self::with_state(path, PersistedState::new(fallback_version));
                store.flush()?;
                Ok((store, Some(EdgeError::persistence_corruption(msg))))
            }
            Err(e) => Err(e),
        }
    }

    fn with_state(path: PathBuf, state: PersistedState) -> Self {
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }

    pub fn update_state(&self) -> UpdateState {
        self.state.lock().update.clone()
    }

    /// Most recent transitions, oldest first
    pub fn recent_transitions(&self, limit: usize) -> Vec<PhaseTransition> {
        let state = self.state.lock();
        let skip = state.transitions.len().saturating_sub(limit);
        state.transitions.iter().skip(skip).cloned().collect()
    }

    /// Persist a new update state, logging the phase change when there is one
    pub fn record_update(&self, update: &UpdateState, from: UpdatePhase) -> Result<()> {
        self.commit(|state| {
            if from != update.phase {
                let transition = PhaseTransition {
                    from,
                    to: update.phase,
                    version: update.current_version,
                    candidate: update.candidate_version,
                    at: Utc::now(),
                };
                push_bounded(&mut state.transitions, transition, TRANSITION_HISTORY_LIMIT);
            }
            state.update = update.clone();
        })
    }

    pub fn set_last_known_good(&self, checksum: &str) -> Result<()> {
        self.commit(|state| {
            state.last_known_good_checksum = Some(checksum.to_ascii_lowercase());
        })
    }

    /// Record the outcome of one sampling cycle
    pub fn record_cycle(&self, snapshot: &HealthSnapshot, new_alerts: &[Alert]) -> Result<()> {
        self.commit(|state| {
            state.last_health_check = Some(HealthCheckRecord {
                score: snapshot.overall_score,
                at: snapshot.computed_at,
            });
            for alert in new_alerts {
                push_bounded(&mut state.alert_history, alert.clone(), ALERT_HISTORY_LIMIT);
            }
        })
    }

    /// Apply `change` to a copy and keep it only once it is on disk
    fn commit(&self, change: impl FnOnce(&mut PersistedState)) -> Result<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        change(&mut next);
        Self::persist(&self.path, &next)?;
        *state = next;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock();
        Self::persist(&self.path, &state)
    }

    fn persist(path: &Path, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(path, &json)?;
        Ok(())
    }
}
