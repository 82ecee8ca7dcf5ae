use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::status::{CheckOptions, ServiceStatusRegistry};
use crate::events::{EventBus, HealthEvent};
use crate::models::{ServiceName, ServiceStatus};

/// Adaptive probe cadence for one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingStrategy {
    /// Stable service, probe rarely
    Slow,
    Normal,
    /// Unstable service, probe often to catch recovery early
    Fast,
}

impl PollingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollingStrategy::Slow => "slow",
            PollingStrategy::Normal => "normal",
            PollingStrategy::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub stable_threshold: u32,
    pub unstable_threshold: u32,
    pub slow_interval: Duration,
    pub normal_interval: Duration,
    pub fast_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub idle_timeout: Duration,
    pub idle_interval: Duration,
    /// How often the idle detector looks at the activity tracker
    pub idle_check_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            stable_threshold: 5,
            unstable_threshold: 3,
            slow_interval: Duration::from_secs(120),
            normal_interval: Duration::from_secs(60),
            fast_interval: Duration::from_secs(15),
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(600),
            idle_timeout: Duration::from_secs(600),
            idle_interval: Duration::from_secs(300),
            idle_check_interval: Duration::from_secs(30),
        }
    }
}

/// Strategy as a pure function of the consecutive counters
pub fn compute_strategy(
    consecutive_successes: u32,
    consecutive_failures: u32,
    settings: &MonitorSettings,
) -> PollingStrategy {
    if consecutive_successes >= settings.stable_threshold {
        PollingStrategy::Slow
    } else if consecutive_failures >= settings.unstable_threshold {
        PollingStrategy::Fast
    } else {
        PollingStrategy::Normal
    }
}

/// Interval for `strategy`, floored at the idle interval while idle and
/// always inside `[min_interval, max_interval]`
pub fn effective_interval(
    strategy: PollingStrategy,
    idle: bool,
    settings: &MonitorSettings,
) -> Duration {
    let base = match strategy {
        PollingStrategy::Slow => settings.slow_interval,
        PollingStrategy::Normal => settings.normal_interval,
        PollingStrategy::Fast => settings.fast_interval,
    };
    let floored = if idle {
        base.max(settings.idle_interval)
    } else {
        base
    };
    floored.clamp(
        settings.min_interval,
        settings.max_interval.max(settings.min_interval),
    )
}

/// Scheduling state of one monitored service
#[derive(Debug, Clone)]
pub struct ServiceState {
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub polling_strategy: PollingStrategy,
    pub current_interval: Duration,
    pub enabled: bool,
    pub check_in_progress: bool,
    pub last_connected: Option<bool>,
    pub last_check: Option<DateTime<Utc>>,
    down_since: Option<Instant>,
}

/// What changed after folding one probe result into a [`ServiceState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateUpdate {
    pub previous: Option<bool>,
    pub strategy_changed: bool,
    pub downtime: Option<Duration>,
}

impl StateUpdate {
    pub fn recovered(&self, connected: bool) -> bool {
        self.previous == Some(false) && connected
    }

    pub fn failed(&self, connected: bool) -> bool {
        self.previous == Some(true) && !connected
    }
}

impl ServiceState {
    pub fn new(settings: &MonitorSettings) -> Self {
        Self {
            consecutive_successes: 0,
            consecutive_failures: 0,
            polling_strategy: PollingStrategy::Normal,
            current_interval: effective_interval(PollingStrategy::Normal, false, settings),
            enabled: true,
            check_in_progress: false,
            last_connected: None,
            last_check: None,
            down_since: None,
        }
    }

    /// Count the result, then recompute strategy and interval
    pub fn apply_result(
        &mut self,
        connected: bool,
        idle: bool,
        settings: &MonitorSettings,
    ) -> StateUpdate {
        let previous = self.last_connected;
        let mut downtime = None;

        if connected {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
            downtime = self.down_since.take().map(|since| since.elapsed());
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
            if self.down_since.is_none() {
                self.down_since = Some(Instant::now());
            }
        }

        let strategy = compute_strategy(
            self.consecutive_successes,
            self.consecutive_failures,
            settings,
        );
        let strategy_changed = strategy != self.polling_strategy;
        self.polling_strategy = strategy;
        self.current_interval = effective_interval(strategy, idle, settings);
        self.last_connected = Some(connected);
        self.last_check = Some(Utc::now());

        StateUpdate {
            previous,
            strategy_changed,
            downtime,
        }
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.down_since = None;
    }
}

/// Last user-activity signal, shared with whatever produces those signals
#[derive(Debug)]
pub struct ActivityTracker {
    origin: Instant,
    last_activity_ms: AtomicU64,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn record_activity(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }

    pub fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.idle_for() >= idle_timeout
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorOptions {
    /// Probe once right away instead of waiting a full interval
    pub check_immediately: bool,
}

#[derive(Debug, Clone)]
pub struct MonitoringStatus {
    pub active: bool,
    pub idle: bool,
    pub idle_for: Duration,
    pub services: HashMap<ServiceName, ServiceState>,
}

/// Recurring, adaptively scheduled probes on top of the status registry
#[derive(Debug)]
pub struct BackgroundHealthMonitor {
    registry: Arc<ServiceStatusRegistry>,
    settings: MonitorSettings,
    activity: Arc<ActivityTracker>,
    states: RwLock<HashMap<ServiceName, ServiceState>>,
    tasks: Mutex<HashMap<ServiceName, CancellationToken>>,
    idle_task: Mutex<Option<CancellationToken>>,
    idle: AtomicBool,
}

impl BackgroundHealthMonitor {
    pub fn new(
        registry: Arc<ServiceStatusRegistry>,
        settings: MonitorSettings,
        activity: Arc<ActivityTracker>,
    ) -> Self {
        Self {
            registry,
            settings,
            activity,
            states: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            idle_task: Mutex::new(None),
            idle: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceStatusRegistry> {
        &self.registry
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    fn events(&self) -> &Arc<EventBus<HealthEvent>> {
        self.registry.events()
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Relaxed)
    }

    /// Schedule recurring probes for `services`; restarting a service
    /// replaces its previous schedule.
    pub async fn start_monitoring(self: &Arc<Self>, services: &[ServiceName], options: MonitorOptions) {
        for &service in services {
            {
                let mut states = self.states.write().await;
                let state = states
                    .entry(service)
                    .or_insert_with(|| ServiceState::new(&self.settings));
                state.enabled = true;
            }

            let token = CancellationToken::new();
            if let Some(previous) = self.tasks.lock().await.insert(service, token.clone()) {
                previous.cancel();
            }

            let weak = Arc::downgrade(self);
            tokio::spawn(Self::service_loop(weak, service, token, options));
            info!("Monitoring {} (check immediately: {})", service, options.check_immediately);
        }

        self.ensure_idle_task().await;
    }

    async fn service_loop(
        monitor: Weak<Self>,
        service: ServiceName,
        token: CancellationToken,
        options: MonitorOptions,
    ) {
        if options.check_immediately {
            let Some(this) = monitor.upgrade() else { return };
            this.run_scheduled_check(service).await;
        }

        loop {
            let interval = {
                let Some(this) = monitor.upgrade() else { return };
                this.current_interval(service).await
            };

            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Scheduled probes for {} cancelled", service);
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            if token.is_cancelled() {
                return;
            }
            let Some(this) = monitor.upgrade() else { return };
            this.run_scheduled_check(service).await;
        }
    }

    async fn ensure_idle_task(self: &Arc<Self>) {
        let mut guard = self.idle_task.lock().await;
        if guard.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return;
        }

        let token = CancellationToken::new();
        *guard = Some(token.clone());
        let weak = Arc::downgrade(self);
        let tick = self.settings.idle_check_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(tick) => {}
                }
                let Some(this) = weak.upgrade() else { return };
                this.update_idle_state().await;
            }
        });
    }

    /// Re-evaluate idleness and stretch or restore intervals accordingly
    pub async fn update_idle_state(&self) -> bool {
        let idle = self.activity.is_idle(self.settings.idle_timeout);
        let was_idle = self.idle.swap(idle, Ordering::Relaxed);
        if idle == was_idle {
            return idle;
        }

        info!(
            "User {} (idle for {:?})",
            if idle { "went idle" } else { "is active again" },
            self.activity.idle_for()
        );

        {
            let mut states = self.states.write().await;
            for state in states.values_mut() {
                state.current_interval =
                    effective_interval(state.polling_strategy, idle, &self.settings);
            }
        }
        self.events().publish(HealthEvent::IdleChanged { idle }).await;
        idle
    }

    async fn current_interval(&self, service: ServiceName) -> Duration {
        self.states
            .read()
            .await
            .get(&service)
            .map(|s| s.current_interval)
            .unwrap_or(self.settings.normal_interval)
    }

    async fn run_scheduled_check(&self, service: ServiceName) {
        {
            let mut states = self.states.write().await;
            match states.get_mut(&service) {
                Some(state) if state.enabled && !state.check_in_progress => {
                    state.check_in_progress = true;
                }
                Some(_) => {
                    debug!("Skipping scheduled {} probe, one is already running", service);
                    return;
                }
                None => return,
            }
        }

        // the skip window is for interactive callers; the tracker needs live results
        let status = self.registry.check_service(service, CheckOptions::live()).await;

        if let Some(state) = self.states.write().await.get_mut(&service) {
            state.check_in_progress = false;
        }
        self.process_result(&status).await;
    }

    /// Fold a probe result into the service's state and emit what changed
    async fn process_result(&self, status: &ServiceStatus) {
        let service = status.service;
        let idle = self.is_idle();

        let (update, strategy, interval) = {
            let mut states = self.states.write().await;
            let Some(state) = states.get_mut(&service) else {
                return;
            };
            let update = state.apply_result(status.connected, idle, &self.settings);
            (update, state.polling_strategy, state.current_interval)
        };

        if update.strategy_changed {
            debug!(
                "{} polling strategy now {} ({:?})",
                service,
                strategy.as_str(),
                interval
            );
            self.events()
                .publish(HealthEvent::StrategyChanged {
                    service,
                    strategy,
                    interval,
                })
                .await;
        }

        if update.recovered(status.connected) {
            info!("{} recovered after {:?}", service, update.downtime);
            if let Some(state) = self.states.write().await.get_mut(&service) {
                state.reset_failures();
            }
            self.registry.enable_skip(service).await;
            self.events()
                .publish(HealthEvent::ServiceRecovered {
                    service,
                    downtime: update.downtime,
                })
                .await;
        } else if update.failed(status.connected) {
            warn!("{} failed: {:?}", service, status.error);
            self.registry.disable_skip(service).await;
            self.events()
                .publish(HealthEvent::ServiceFailed {
                    service,
                    error: status.error.clone(),
                })
                .await;
        }
    }

    /// Probe every enabled service now as one sweep. Runs alongside any
    /// scheduled probe without cancelling it.
    pub async fn force_immediate_check(&self) -> HashMap<ServiceName, ServiceStatus> {
        let services: Vec<ServiceName> = {
            let states = self.states.read().await;
            if states.is_empty() {
                self.registry.registered_services()
            } else {
                states
                    .iter()
                    .filter(|(_, s)| s.enabled)
                    .map(|(name, _)| *name)
                    .collect()
            }
        };

        let results = self
            .registry
            .check_services(&services, CheckOptions::forced())
            .await;

        for status in &results {
            self.process_result(status).await;
        }

        results.into_iter().map(|s| (s.service, s)).collect()
    }

    /// Stop one service's schedule, or everything including idle detection
    pub async fn stop_monitoring(&self, service: Option<ServiceName>) {
        match service {
            Some(service) => {
                if let Some(token) = self.tasks.lock().await.remove(&service) {
                    token.cancel();
                }
                if let Some(state) = self.states.write().await.get_mut(&service) {
                    state.enabled = false;
                }
                info!("Stopped monitoring {}", service);
            }
            None => {
                for (_, token) in self.tasks.lock().await.drain() {
                    token.cancel();
                }
                if let Some(token) = self.idle_task.lock().await.take() {
                    token.cancel();
                }
                for state in self.states.write().await.values_mut() {
                    state.enabled = false;
                }
                info!("Stopped all health monitoring");
            }
        }

        self.events()
            .publish(HealthEvent::MonitoringStopped { service })
            .await;
    }

    pub async fn get_monitoring_status(&self) -> MonitoringStatus {
        let active = !self.tasks.lock().await.is_empty();
        MonitoringStatus {
            active,
            idle: self.is_idle(),
            idle_for: self.activity.idle_for(),
            services: self.states.read().await.clone(),
        }
    }
}
