use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::fallback_cache::{FallbackCache, phase_key, service_key};
use super::retry::{RetryPolicy, RetryRecord, RetryTracker};
use crate::backends::{CatalogBackend, CatalogQuery};
use crate::events::{CallbackGuard, CallbackSet, EventBus, RecoveryEvent};
use crate::models::{MediaItem, OperationId, Phase, ServiceName};
use crate::services::status::{CheckOptions, ServiceStatusRegistry};
use crate::utils::errors::{CatalogError, ErrorClass};

#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub fallback_ttl: Duration,
    /// Consecutive service-unavailable errors before local-only is recommended
    pub service_failure_threshold: u32,
    /// Cadence of the service-specific recovery probes
    pub recovery_probe_interval: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            fallback_ttl: Duration::from_secs(300),
            service_failure_threshold: 3,
            recovery_probe_interval: Duration::from_secs(30),
        }
    }
}

/// Where a failure happened and what was in hand at the time
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: OperationId,
    pub service: Option<ServiceName>,
    pub phase: Phase,
    /// Request to replay against an alternate endpoint
    pub query: Option<CatalogQuery>,
    /// Data that came with the failure, e.g. a batch that failed validation
    pub payload: Option<Vec<MediaItem>>,
}

impl ErrorContext {
    pub fn new(operation: OperationId, phase: Phase) -> Self {
        Self {
            operation,
            service: None,
            phase,
            query: None,
            payload: None,
        }
    }

    pub fn with_service(mut self, service: ServiceName) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_query(mut self, query: CatalogQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_payload(mut self, payload: Vec<MediaItem>) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    AlternateEndpoint { backend: String },
    FallbackCache { key: String },
    FilteredPayload { removed: usize },
    PublicOnly,
    /// Stop reaching for the service and keep showing local data
    LocalOnly,
    RetryScheduled,
    Unrecoverable,
}

#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub class: ErrorClass,
    pub strategy: RecoveryStrategy,
    /// Usable data was produced (or the failure was otherwise handled)
    pub recovered: bool,
    pub data: Option<Vec<MediaItem>>,
    pub retry: Option<RetryRecord>,
    pub recommend_local_only: bool,
    pub message: String,
}

impl RecoveryOutcome {
    fn recovered(class: ErrorClass, strategy: RecoveryStrategy, data: Option<Vec<MediaItem>>, message: String) -> Self {
        Self {
            class,
            strategy,
            recovered: true,
            data,
            retry: None,
            recommend_local_only: false,
            message,
        }
    }

    pub fn is_retry(&self) -> bool {
        self.retry.is_some()
    }
}

/// Classifies failures and walks the escalation ladder: direct recovery,
/// fallback chain, scheduled retry, unrecoverable.
#[derive(Debug)]
pub struct ErrorRecoveryEngine {
    settings: RecoverySettings,
    registry: Arc<ServiceStatusRegistry>,
    alternate: Option<Arc<dyn CatalogBackend>>,
    retries: Mutex<RetryTracker>,
    fallback: FallbackCache,
    service_failures: Mutex<HashMap<ServiceName, u32>>,
    degraded: RwLock<HashSet<ServiceName>>,
    monitors: Mutex<HashMap<ServiceName, CancellationToken>>,
    recovery_callbacks: CallbackSet<ServiceName>,
    events: Arc<EventBus<RecoveryEvent>>,
}

impl ErrorRecoveryEngine {
    pub fn new(
        settings: RecoverySettings,
        policy: RetryPolicy,
        registry: Arc<ServiceStatusRegistry>,
        events: Arc<EventBus<RecoveryEvent>>,
    ) -> Self {
        Self {
            fallback: FallbackCache::new(settings.fallback_ttl),
            settings,
            registry,
            alternate: None,
            retries: Mutex::new(RetryTracker::new(policy)),
            service_failures: Mutex::new(HashMap::new()),
            degraded: RwLock::new(HashSet::new()),
            monitors: Mutex::new(HashMap::new()),
            recovery_callbacks: CallbackSet::new(),
            events,
        }
    }

    /// Backend tried when the primary one is unreachable
    pub fn with_alternate(mut self, backend: Arc<dyn CatalogBackend>) -> Self {
        self.alternate = Some(backend);
        self
    }

    pub fn events(&self) -> &Arc<EventBus<RecoveryEvent>> {
        &self.events
    }

    pub fn fallback_cache(&self) -> &FallbackCache {
        &self.fallback
    }

    pub async fn retry_policy(&self) -> RetryPolicy {
        self.retries.lock().await.policy().clone()
    }

    pub async fn handle_loading_error(
        &self,
        error: &CatalogError,
        context: &ErrorContext,
    ) -> RecoveryOutcome {
        let class = error.class();
        let message = error.to_string();
        warn!(
            "{} failed during {} ({}): {}",
            context.operation, context.phase, class, message
        );

        if let Some(outcome) = self.direct_recovery(class, &message, context).await {
            info!(
                "{}: recovered directly via {:?}",
                context.operation, outcome.strategy
            );
            return outcome;
        }

        if let Some((key, data)) = self.fallback_chain(context).await {
            info!(
                "{}: serving {} cached items from {}",
                context.operation,
                data.len(),
                key
            );
            return RecoveryOutcome::recovered(
                class,
                RecoveryStrategy::FallbackCache { key },
                Some(data),
                message,
            );
        }

        if class.is_retryable() {
            let scheduled = self
                .retries
                .lock()
                .await
                .schedule(&context.operation, class, &message);

            match scheduled {
                Some(record) => {
                    self.events
                        .publish(RecoveryEvent::RetryScheduled {
                            operation: context.operation.to_string(),
                            attempt: record.attempt_count,
                            delay: record.next_delay,
                        })
                        .await;
                    return RecoveryOutcome {
                        class,
                        strategy: RecoveryStrategy::RetryScheduled,
                        recovered: false,
                        data: None,
                        retry: Some(record),
                        recommend_local_only: false,
                        message,
                    };
                }
                None => {
                    self.events
                        .publish(RecoveryEvent::RetriesExhausted {
                            operation: context.operation.to_string(),
                            class,
                        })
                        .await;
                    if let Some(service) = context.service {
                        self.enter_degraded_mode(service, "retry budget exhausted")
                            .await;
                    }
                }
            }
        }

        error!(
            "{}: unrecoverable {} failure during {}: {}",
            context.operation, class, context.phase, message
        );
        RecoveryOutcome {
            class,
            strategy: RecoveryStrategy::Unrecoverable,
            recovered: false,
            data: Some(Vec::new()),
            retry: None,
            recommend_local_only: context.service.is_some(),
            message,
        }
    }

    async fn direct_recovery(
        &self,
        class: ErrorClass,
        message: &str,
        context: &ErrorContext,
    ) -> Option<RecoveryOutcome> {
        match class {
            ErrorClass::Network => {
                let internet = self
                    .registry
                    .check_service(ServiceName::Internet, CheckOptions::forced())
                    .await;
                if !internet.connected {
                    debug!("Network recovery: still offline");
                    return None;
                }
                let alternate = self.alternate.as_ref()?;
                let query = context.query?;
                match alternate.fetch_catalog(&query).await {
                    Ok(response) => Some(RecoveryOutcome::recovered(
                        class,
                        RecoveryStrategy::AlternateEndpoint {
                            backend: alternate.name().to_string(),
                        },
                        Some(response.media),
                        message.to_string(),
                    )),
                    Err(e) => {
                        debug!("Alternate endpoint {} failed: {}", alternate.name(), e);
                        None
                    }
                }
            }
            ErrorClass::Timeout => {
                let key = context.operation.to_string();
                let entry = self.fallback.get(&key).await?;
                Some(RecoveryOutcome::recovered(
                    class,
                    RecoveryStrategy::FallbackCache { key },
                    Some(entry.data),
                    message.to_string(),
                ))
            }
            ErrorClass::ServiceUnavailable => {
                let service = context.service?;
                let failures = {
                    let mut counters = self.service_failures.lock().await;
                    let count = counters.entry(service).or_insert(0);
                    *count += 1;
                    *count
                };
                debug!("{} unavailable {} time(s) in a row", service, failures);
                if failures < self.settings.service_failure_threshold {
                    return None;
                }
                self.enter_degraded_mode(service, "service repeatedly unavailable")
                    .await;
                let mut outcome = RecoveryOutcome::recovered(
                    class,
                    RecoveryStrategy::LocalOnly,
                    None,
                    message.to_string(),
                );
                outcome.recommend_local_only = true;
                Some(outcome)
            }
            ErrorClass::Validation => {
                let payload = context.payload.as_ref()?;
                let valid: Vec<MediaItem> = payload
                    .iter()
                    .filter(|item| item.is_structurally_valid())
                    .cloned()
                    .collect();
                if valid.is_empty() {
                    return None;
                }
                let removed = payload.len() - valid.len();
                Some(RecoveryOutcome::recovered(
                    class,
                    RecoveryStrategy::FilteredPayload { removed },
                    Some(valid),
                    message.to_string(),
                ))
            }
            ErrorClass::Permission => {
                let source = match &context.payload {
                    Some(payload) => payload.clone(),
                    None => self.fallback.get(context.operation.as_str()).await?.data,
                };
                // local files need no credentials
                let public: Vec<MediaItem> =
                    source.into_iter().filter(|item| item.has_local()).collect();
                if public.is_empty() {
                    return None;
                }
                Some(RecoveryOutcome::recovered(
                    class,
                    RecoveryStrategy::PublicOnly,
                    Some(public),
                    message.to_string(),
                ))
            }
            ErrorClass::Unknown => None,
        }
    }

    /// operation id, then service, then phase
    async fn fallback_chain(&self, context: &ErrorContext) -> Option<(String, Vec<MediaItem>)> {
        let mut keys = vec![context.operation.to_string()];
        if let Some(service) = context.service {
            keys.push(service_key(service));
        }
        keys.push(phase_key(context.phase));

        for key in keys {
            if let Some(entry) = self.fallback.get(&key).await {
                return Some((key, entry.data));
            }
        }
        None
    }

    /// Populate the fallback cache after a successful fetch
    pub async fn cache_success(
        &self,
        operation: &OperationId,
        service: Option<ServiceName>,
        phase: Phase,
        data: &[MediaItem],
    ) {
        self.fallback.put(operation.to_string(), data.to_vec()).await;
        if let Some(service) = service {
            self.fallback.put(service_key(service), data.to_vec()).await;
        }
        self.fallback.put(phase_key(phase), data.to_vec()).await;
    }

    /// Reset retry and failure bookkeeping after a success
    pub async fn record_success(&self, operation: &OperationId, service: Option<ServiceName>) {
        if self.retries.lock().await.clear(operation) {
            debug!("{}: retry counter cleared", operation);
        }
        if let Some(service) = service {
            self.service_failures.lock().await.remove(&service);
            if self.degraded.write().await.remove(&service) {
                info!("{} left degraded mode", service);
                self.events
                    .publish(RecoveryEvent::DegradedModeCleared { service })
                    .await;
            }
        }
    }

    /// Give `operation` a fresh retry budget without touching degraded state
    pub async fn reset_retries(&self, operation: &OperationId) {
        if self.retries.lock().await.clear(operation) {
            debug!("{}: retry budget reset", operation);
        }
    }

    pub async fn active_retry(&self, operation: &OperationId) -> Option<RetryRecord> {
        self.retries.lock().await.get(operation).cloned()
    }

    pub async fn is_degraded(&self, service: ServiceName) -> bool {
        self.degraded.read().await.contains(&service)
    }

    async fn enter_degraded_mode(&self, service: ServiceName, reason: &str) {
        if self.degraded.write().await.insert(service) {
            warn!("{} switched to degraded mode: {}", service, reason);
            self.events
                .publish(RecoveryEvent::DegradedMode {
                    service,
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    /// Called with the service name whenever a recovery monitor sees it answer
    #[must_use = "dropping the guard unregisters the callback"]
    pub fn on_service_recovered<F>(&self, callback: F) -> CallbackGuard
    where
        F: Fn(&ServiceName) + Send + Sync + 'static,
    {
        self.recovery_callbacks.register(callback)
    }

    /// Probe `service` on its own schedule until it answers, then notify the
    /// recovery callbacks and stop.
    pub async fn start_recovery_monitor(self: &Arc<Self>, service: ServiceName) {
        let mut monitors = self.monitors.lock().await;
        if monitors.get(&service).is_some_and(|t| !t.is_cancelled()) {
            return;
        }

        let token = CancellationToken::new();
        monitors.insert(service, token.clone());
        let weak = Arc::downgrade(self);
        let interval = self.settings.recovery_probe_interval;
        info!("Recovery monitor for {} started ({:?})", service, interval);

        tokio::spawn(Self::recovery_loop(weak, service, interval, token));
    }

    async fn recovery_loop(
        engine: Weak<Self>,
        service: ServiceName,
        interval: Duration,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let Some(this) = engine.upgrade() else { return };
            let status = this.registry.check_service(service, CheckOptions::live()).await;
            if !status.connected {
                debug!("Recovery monitor: {} still down", service);
                continue;
            }

            info!("Recovery monitor: {} responding again", service);
            this.monitors.lock().await.remove(&service);
            this.service_failures.lock().await.remove(&service);
            this.events
                .publish(RecoveryEvent::ServiceResponding { service })
                .await;
            this.recovery_callbacks.invoke(&service);
            return;
        }
    }

    pub async fn stop_recovery_monitors(&self) {
        for (service, token) in self.monitors.lock().await.drain() {
            debug!("Stopping recovery monitor for {}", service);
            token.cancel();
        }
    }

    pub async fn recovery_monitor_active(&self, service: ServiceName) -> bool {
        self.monitors.lock().await.contains_key(&service)
    }
}
