use futures::future::join_all;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::probes::ServiceProbe;
use crate::events::{EventBus, HealthEvent};
use crate::models::{ConnectivityMode, ProbeMethod, ServiceName, ServiceStatus, SystemHealth};

#[derive(Debug, Clone)]
pub struct StatusSettings {
    /// Read-through window for `check_service`
    pub cache_ttl: Duration,
    /// How long a confirmed media-server connection is reused without probing
    pub skip_window: Duration,
    pub default_timeout: Duration,
    pub probe_timeouts: HashMap<ServiceName, Duration>,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            skip_window: Duration::from_secs(300),
            default_timeout: Duration::from_secs(5),
            probe_timeouts: HashMap::from([
                (ServiceName::Internet, Duration::from_secs(3)),
                (ServiceName::MediaServer, Duration::from_secs(5)),
                (ServiceName::Player, Duration::from_secs(3)),
                (ServiceName::LocalMedia, Duration::from_secs(3)),
            ]),
        }
    }
}

impl StatusSettings {
    pub fn timeout_for(&self, service: ServiceName) -> Duration {
        self.probe_timeouts
            .get(&service)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    /// Bypass both the TTL cache and the skip window
    pub force_refresh: bool,
    pub use_cache: bool,
    /// Probe live even inside the media-server skip window
    pub bypass_skip_window: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            use_cache: true,
            bypass_skip_window: false,
        }
    }
}

impl CheckOptions {
    pub fn forced() -> Self {
        Self {
            force_refresh: true,
            use_cache: false,
            bypass_skip_window: true,
        }
    }

    /// Fresh result for periodic health tracking; cached values and the
    /// skip window would hide failures from the tracker
    pub fn live() -> Self {
        Self {
            force_refresh: false,
            use_cache: false,
            bypass_skip_window: true,
        }
    }

    fn honours_skip_window(&self) -> bool {
        !self.force_refresh && !self.bypass_skip_window
    }
}

#[derive(Debug, Clone)]
struct CachedStatus {
    status: ServiceStatus,
    cached_at: Instant,
}

#[derive(Debug, Clone)]
struct SkipState {
    enabled: bool,
    confirmed_at: Option<Instant>,
}

impl Default for SkipState {
    fn default() -> Self {
        Self {
            enabled: true,
            confirmed_at: None,
        }
    }
}

/// Bounded-timeout probes with TTL caching for every dependent service
#[derive(Debug)]
pub struct ServiceStatusRegistry {
    probes: HashMap<ServiceName, Arc<dyn ServiceProbe>>,
    settings: StatusSettings,
    latest: RwLock<HashMap<ServiceName, ServiceStatus>>,
    cache: RwLock<LruCache<ServiceName, CachedStatus>>,
    skip: RwLock<HashMap<ServiceName, SkipState>>,
    events: Arc<EventBus<HealthEvent>>,
}

impl ServiceStatusRegistry {
    pub fn new(settings: StatusSettings, events: Arc<EventBus<HealthEvent>>) -> Self {
        let capacity = NonZeroUsize::new(ServiceName::ALL.len()).unwrap_or(NonZeroUsize::MIN);
        Self {
            probes: HashMap::new(),
            settings,
            latest: RwLock::new(HashMap::new()),
            cache: RwLock::new(LruCache::new(capacity)),
            skip: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register the probe for `probe.service()`, replacing any previous one
    pub fn with_probe(mut self, probe: Arc<dyn ServiceProbe>) -> Self {
        self.probes.insert(probe.service(), probe);
        self
    }

    pub fn settings(&self) -> &StatusSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<EventBus<HealthEvent>> {
        &self.events
    }

    pub fn registered_services(&self) -> Vec<ServiceName> {
        let mut services: Vec<_> = self.probes.keys().copied().collect();
        services.sort();
        services
    }

    /// Probe `service`, honouring the TTL cache, the dependency on network
    /// reachability, and the skip window.
    pub async fn check_service(&self, service: ServiceName, options: CheckOptions) -> ServiceStatus {
        self.check_with_dependency(service, options, None).await
    }

    /// Check several services in one sweep. Services without a dependency
    /// run concurrently first; dependents then reuse the dependency status
    /// from this sweep instead of checking it a second time.
    pub async fn check_services(
        &self,
        services: &[ServiceName],
        options: CheckOptions,
    ) -> Vec<ServiceStatus> {
        let (dependents, independents): (Vec<ServiceName>, Vec<ServiceName>) = services
            .iter()
            .copied()
            .partition(|service| service.depends_on().is_some());

        let mut results = join_all(
            independents
                .iter()
                .map(|&service| self.check_with_dependency(service, options, None)),
        )
        .await;

        let swept: HashMap<ServiceName, ServiceStatus> = results
            .iter()
            .map(|status| (status.service, status.clone()))
            .collect();
        let dependent_checks = dependents.iter().map(|&service| {
            let known = service
                .depends_on()
                .and_then(|dependency| swept.get(&dependency).cloned());
            self.check_with_dependency(service, options, known)
        });
        results.extend(join_all(dependent_checks).await);
        results
    }

    async fn check_with_dependency(
        &self,
        service: ServiceName,
        options: CheckOptions,
        known_dependency: Option<ServiceStatus>,
    ) -> ServiceStatus {
        if let Some(cached) = self.cached(service, options).await {
            return cached;
        }

        if let Some(dependency) = service.depends_on() {
            let dependency_status = match known_dependency {
                Some(status) => status,
                None => self.check_independent(dependency, options).await,
            };
            if !dependency_status.connected {
                let reason = if dependency == ServiceName::Internet {
                    "no internet".to_string()
                } else {
                    format!("{} unavailable", dependency)
                };
                debug!("Skipping {} check: {}", service, reason);
                let status =
                    ServiceStatus::disconnected(service, ProbeMethod::Skipped, Duration::ZERO, reason);
                self.record(status.clone()).await;
                return status;
            }
        }

        self.probe_uncached(service, options).await
    }

    /// Probe a service that has no dependency of its own
    async fn check_independent(&self, service: ServiceName, options: CheckOptions) -> ServiceStatus {
        if let Some(cached) = self.cached(service, options).await {
            return cached;
        }
        self.probe_uncached(service, options).await
    }

    async fn cached(&self, service: ServiceName, options: CheckOptions) -> Option<ServiceStatus> {
        if options.force_refresh || !options.use_cache {
            return None;
        }
        let cache = self.cache.read().await;
        let entry = cache.peek(&service)?;
        if entry.cached_at.elapsed() < self.settings.cache_ttl {
            let mut status = entry.status.clone();
            status.from_cache = true;
            Some(status)
        } else {
            None
        }
    }

    async fn skip_window_hit(&self, service: ServiceName) -> Option<ServiceStatus> {
        if !service.supports_skip_window() {
            return None;
        }
        let confirmed_at = {
            let skip = self.skip.read().await;
            let state = skip.get(&service)?;
            if !state.enabled {
                return None;
            }
            state.confirmed_at?
        };
        if confirmed_at.elapsed() >= self.settings.skip_window {
            return None;
        }

        let latest = self.latest.read().await;
        let status = latest.get(&service).filter(|s| s.connected)?;
        let mut reused = status.clone();
        reused.method = ProbeMethod::SkipWindow;
        reused.from_cache = true;
        Some(reused)
    }

    async fn probe_uncached(&self, service: ServiceName, options: CheckOptions) -> ServiceStatus {
        if options.honours_skip_window()
            && let Some(reused) = self.skip_window_hit(service).await
        {
            debug!("Reusing confirmed {} status (skip window)", service);
            return reused;
        }

        let Some(probe) = self.probes.get(&service).cloned() else {
            warn!("No probe registered for {}", service);
            let status = ServiceStatus::disconnected(
                service,
                ProbeMethod::Failed,
                Duration::ZERO,
                "no probe registered",
            );
            self.record(status.clone()).await;
            return status;
        };

        let limit = self.settings.timeout_for(service);
        let start = Instant::now();
        let status = match timeout(limit, probe.probe()).await {
            Ok(status) => status,
            Err(_) => {
                warn!("{} probe timed out after {:?}", service, limit);
                ServiceStatus::disconnected(
                    service,
                    ProbeMethod::Timeout,
                    start.elapsed(),
                    format!("probe timed out after {:?}", limit),
                )
            }
        };

        self.record(status.clone()).await;
        status
    }

    /// Store a status as the latest known value (last write wins)
    async fn record(&self, status: ServiceStatus) {
        let service = status.service;

        {
            let mut cache = self.cache.write().await;
            cache.put(
                service,
                CachedStatus {
                    status: status.clone(),
                    cached_at: Instant::now(),
                },
            );
        }

        if service.supports_skip_window() {
            let mut skip = self.skip.write().await;
            let state = skip.entry(service).or_default();
            if status.connected && status.method != ProbeMethod::SkipWindow {
                if state.enabled {
                    state.confirmed_at = Some(Instant::now());
                }
            } else if !status.connected {
                if state.confirmed_at.take().is_some() {
                    debug!("{} failed, skip window cleared", service);
                }
            }
        }

        let previous = {
            let mut latest = self.latest.write().await;
            latest.insert(service, status.clone())
        };

        if let Some(previous) = previous
            && previous.connected != status.connected
        {
            info!(
                "{} changed: {} -> {}",
                service,
                if previous.connected { "up" } else { "down" },
                if status.connected { "up" } else { "down" }
            );
            self.events
                .publish(HealthEvent::StateTransition {
                    service,
                    from: previous.connected,
                    to: status.connected,
                })
                .await;
        }
        self.events.publish(HealthEvent::StatusUpdated(status)).await;
    }

    pub async fn get_status(&self, service: ServiceName) -> Option<ServiceStatus> {
        self.latest.read().await.get(&service).cloned()
    }

    pub async fn get_all_statuses(&self) -> HashMap<ServiceName, ServiceStatus> {
        self.latest.read().await.clone()
    }

    /// Overwrite the status of a service from outside a probe
    pub async fn set_status(&self, status: ServiceStatus) {
        debug!(
            "Status of {} set externally: connected={}",
            status.service, status.connected
        );
        self.record(status).await;
    }

    /// Drop cached results for one service, or for all of them
    pub async fn clear_cache(&self, service: Option<ServiceName>) {
        let mut cache = self.cache.write().await;
        match service {
            Some(service) => {
                cache.pop(&service);
            }
            None => cache.clear(),
        }
    }

    pub async fn enable_skip(&self, service: ServiceName) {
        if !service.supports_skip_window() {
            return;
        }
        let connected = self
            .get_status(service)
            .await
            .is_some_and(|s| s.connected);
        let mut skip = self.skip.write().await;
        let state = skip.entry(service).or_default();
        state.enabled = true;
        if connected {
            state.confirmed_at = Some(Instant::now());
        }
    }

    pub async fn disable_skip(&self, service: ServiceName) {
        let mut skip = self.skip.write().await;
        let state = skip.entry(service).or_default();
        state.enabled = false;
        state.confirmed_at = None;
    }

    /// Remaining time in the skip window, if one is active
    pub async fn skip_window_remaining(&self, service: ServiceName) -> Option<Duration> {
        let skip = self.skip.read().await;
        let state = skip.get(&service).filter(|s| s.enabled)?;
        let elapsed = state.confirmed_at?.elapsed();
        self.settings.skip_window.checked_sub(elapsed)
    }

    /// Mode derived from the latest known statuses; unknown counts as up
    pub async fn connectivity_mode(&self) -> ConnectivityMode {
        let latest = self.latest.read().await;
        let up = |service: ServiceName| latest.get(&service).map(|s| s.connected);

        if up(ServiceName::Internet) == Some(false) {
            ConnectivityMode::Offline
        } else if up(ServiceName::MediaServer) == Some(false) {
            ConnectivityMode::Degraded
        } else {
            ConnectivityMode::Online
        }
    }

    pub async fn system_health(&self) -> SystemHealth {
        SystemHealth::from_statuses(&*self.latest.read().await)
    }
}
