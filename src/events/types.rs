use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::{ConnectivityMode, MediaItem, Phase, ServiceName, ServiceStatus};
use crate::services::monitor::PollingStrategy;
use crate::utils::errors::ErrorClass;

/// Anything that travels over an [`EventBus`](super::EventBus)
pub trait BusEvent: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Dotted name used for filtering and statistics
    fn kind(&self) -> &'static str;

    fn priority(&self) -> EventPriority {
        EventPriority::Normal
    }
}

/// Envelope stamped onto every published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<E> {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub priority: EventPriority,
    pub payload: E,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl<E: BusEvent> Event<E> {
    pub fn new(payload: E) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            priority: payload.priority(),
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: String, value: serde_json::Value) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// Event priority for filtering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Status registry and health monitor notifications
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// A probe (or `set_status`) produced a new status
    StatusUpdated(ServiceStatus),
    /// Connected/available flag flipped
    StateTransition {
        service: ServiceName,
        from: bool,
        to: bool,
    },
    ServiceRecovered {
        service: ServiceName,
        downtime: Option<Duration>,
    },
    ServiceFailed {
        service: ServiceName,
        error: Option<String>,
    },
    StrategyChanged {
        service: ServiceName,
        strategy: PollingStrategy,
        interval: Duration,
    },
    IdleChanged {
        idle: bool,
    },
    MonitoringStopped {
        service: Option<ServiceName>,
    },
}

impl BusEvent for HealthEvent {
    fn kind(&self) -> &'static str {
        match self {
            HealthEvent::StatusUpdated(_) => "status.updated",
            HealthEvent::StateTransition { .. } => "status.transition",
            HealthEvent::ServiceRecovered { .. } => "service.recovered",
            HealthEvent::ServiceFailed { .. } => "service.failed",
            HealthEvent::StrategyChanged { .. } => "monitor.strategy_changed",
            HealthEvent::IdleChanged { .. } => "monitor.idle_changed",
            HealthEvent::MonitoringStopped { .. } => "monitor.stopped",
        }
    }

    fn priority(&self) -> EventPriority {
        match self {
            HealthEvent::ServiceRecovered { .. } | HealthEvent::ServiceFailed { .. } => {
                EventPriority::High
            }
            HealthEvent::StatusUpdated(_) => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}

/// Error recovery engine notifications
#[derive(Debug, Clone)]
pub enum RecoveryEvent {
    RetryScheduled {
        operation: String,
        attempt: u32,
        delay: Duration,
    },
    RetriesExhausted {
        operation: String,
        class: ErrorClass,
    },
    /// A service-specific recovery monitor saw the service answer again
    ServiceResponding {
        service: ServiceName,
    },
    /// Persistent failure: callers should fall back to local-only data
    DegradedMode {
        service: ServiceName,
        reason: String,
    },
    DegradedModeCleared {
        service: ServiceName,
    },
}

impl BusEvent for RecoveryEvent {
    fn kind(&self) -> &'static str {
        match self {
            RecoveryEvent::RetryScheduled { .. } => "recovery.retry_scheduled",
            RecoveryEvent::RetriesExhausted { .. } => "recovery.retries_exhausted",
            RecoveryEvent::ServiceResponding { .. } => "recovery.service_responding",
            RecoveryEvent::DegradedMode { .. } => "recovery.degraded",
            RecoveryEvent::DegradedModeCleared { .. } => "recovery.degraded_cleared",
        }
    }

    fn priority(&self) -> EventPriority {
        match self {
            RecoveryEvent::DegradedMode { .. } | RecoveryEvent::RetriesExhausted { .. } => {
                EventPriority::High
            }
            _ => EventPriority::Normal,
        }
    }
}

/// Progressive loader hooks handed to the presentation layer
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    LocalLoaded {
        items: Vec<MediaItem>,
        from_cache: bool,
    },
    UserInteractionEnabled,
    BackgroundTasksStarted,
    BackgroundTasksCompleted,
    RemoteLoaded {
        count: usize,
    },
    Complete {
        items: Vec<MediaItem>,
        mode: ConnectivityMode,
    },
    /// Mode changed outside a load pass, e.g. a monitored service failed
    ModeChanged {
        mode: ConnectivityMode,
    },
    LoadingStateChange {
        phase: Phase,
        message: String,
    },
    Error {
        phase: Phase,
        message: String,
        class: ErrorClass,
        recoverable: bool,
        /// Surface a dismissible notification with a manual retry
        persistent: bool,
    },
}

impl BusEvent for LoaderEvent {
    fn kind(&self) -> &'static str {
        match self {
            LoaderEvent::LocalLoaded { .. } => "loader.local_loaded",
            LoaderEvent::UserInteractionEnabled => "loader.interaction_enabled",
            LoaderEvent::BackgroundTasksStarted => "loader.background_started",
            LoaderEvent::BackgroundTasksCompleted => "loader.background_completed",
            LoaderEvent::RemoteLoaded { .. } => "loader.remote_loaded",
            LoaderEvent::Complete { .. } => "loader.complete",
            LoaderEvent::ModeChanged { .. } => "loader.mode_changed",
            LoaderEvent::LoadingStateChange { .. } => "loader.state_change",
            LoaderEvent::Error { .. } => "loader.error",
        }
    }

    fn priority(&self) -> EventPriority {
        match self {
            LoaderEvent::Error {
                persistent: true, ..
            } => EventPriority::Critical,
            LoaderEvent::Error { .. } => EventPriority::High,
            LoaderEvent::LoadingStateChange { .. } => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}
