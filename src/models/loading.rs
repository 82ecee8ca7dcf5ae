use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::identifiers::OperationId;
use super::status::ConnectivityMode;
use crate::utils::errors::ErrorClass;

/// Named stages of a load cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    LoadingLocal,
    LocalComplete,
    CheckingConnectivity,
    LoadingRemoteData,
    RemoteComplete,
    MergingData,
    Validating,
    UnifiedComplete,
    Error,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::Initializing,
        Phase::LoadingLocal,
        Phase::LocalComplete,
        Phase::CheckingConnectivity,
        Phase::LoadingRemoteData,
        Phase::RemoteComplete,
        Phase::MergingData,
        Phase::Validating,
        Phase::UnifiedComplete,
        Phase::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::LoadingLocal => "loading_local",
            Phase::LocalComplete => "local_complete",
            Phase::CheckingConnectivity => "checking_connectivity",
            Phase::LoadingRemoteData => "loading_remote_data",
            Phase::RemoteComplete => "remote_complete",
            Phase::MergingData => "merging_data",
            Phase::Validating => "validating",
            Phase::UnifiedComplete => "unified_complete",
            Phase::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Phase> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::UnifiedComplete | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    #[default]
    Pending,
    Loading,
    Complete,
    Error,
}

/// Progress of one source (local, remote or the unified view)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceProgress {
    pub state: SourceState,
    pub count: usize,
    pub duration: Option<Duration>,
    /// Items came from a persisted snapshot instead of a live fetch
    pub from_cache: bool,
    pub error: Option<String>,
}

impl SourceProgress {
    pub fn complete(count: usize, duration: Duration) -> Self {
        Self {
            state: SourceState::Complete,
            count,
            duration: Some(duration),
            from_cache: false,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            state: SourceState::Error,
            count: 0,
            duration: Some(duration),
            from_cache: false,
            error: Some(error.into()),
        }
    }
}

/// One failure recorded during a load cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub operation: OperationId,
    pub context: String,
    pub message: String,
    pub class: ErrorClass,
    pub recoverable: bool,
    pub rollback_performed: bool,
}

/// Snapshot of a load cycle, reset at the start of every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingState {
    pub cycle: u64,
    pub phase: Phase,
    pub local: SourceProgress,
    pub remote: SourceProgress,
    pub unified: SourceProgress,
    pub user_interaction_enabled: bool,
    pub background_tasks_active: bool,
    pub mode: ConnectivityMode,
    pub errors: Vec<LoadErrorEntry>,
}

impl LoadingState {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            phase: Phase::Initializing,
            local: SourceProgress::default(),
            remote: SourceProgress::default(),
            unified: SourceProgress::default(),
            user_interaction_enabled: false,
            background_tasks_active: false,
            mode: ConnectivityMode::Online,
            errors: Vec::new(),
        }
    }

    pub fn rollbacks(&self) -> usize {
        self.errors.iter().filter(|e| e.rollback_performed).count()
    }
}

impl Default for LoadingState {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Timing of the most recent cycle, measured from the start of `load`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub time_to_interactive: Option<Duration>,
    pub time_to_local_complete: Option<Duration>,
    pub time_to_remote_complete: Option<Duration>,
    pub background_attempts: u32,
}
