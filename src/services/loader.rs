//! Two-stage catalog loading.
//!
//! Stage 1 makes the local catalog interactive as fast as possible. Stage 2
//! runs in the background, fetches the unified catalog, merges it additively
//! and validates the result before it becomes visible. Items already shown to
//! the caller are never retracted: every write to the unified set goes through
//! validation and falls back to [`preserve_existing_items`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::consistency::{
    MergeStrategy, merge_media_results, preserve_existing_items, validate_media_item_consistency,
    validate_mode_transition, validate_remote_items_additive,
};
use super::phase::PhaseStateMachine;
use super::recovery::{ErrorContext, ErrorRecoveryEngine, RecoveryOutcome, RecoveryStrategy};
use super::snapshot_store::{SnapshotFreshness, SnapshotKind, SnapshotStore};
use super::status::{CheckOptions, ServiceStatusRegistry};
use crate::backends::{CatalogBackend, CatalogMode, CatalogQuery};
use crate::events::{
    CallbackGuard, CallbackSet, EventBus, HealthEvent, LoaderEvent, RecoveryEvent, SubscriberError,
};
use crate::models::{
    ConnectivityMode, LoadErrorEntry, LoadingState, MediaItem, OperationId, PerformanceMetrics,
    Phase, ServiceName, SourceProgress, SourceState,
};
use crate::utils::errors::{CatalogError, CatalogResult, ErrorClass};

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Hard limit on the local fetch
    pub local_timeout: Duration,
    /// Hard limit on one background pass
    pub max_background_duration: Duration,
    pub remote_enabled: bool,
    pub merge_strategy: MergeStrategy,
    pub freshness: SnapshotFreshness,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            local_timeout: Duration::from_secs(5),
            max_background_duration: Duration::from_secs(30),
            remote_enabled: true,
            merge_strategy: MergeStrategy::default(),
            freshness: SnapshotFreshness::default(),
        }
    }
}

/// Health change the loader reacts to
#[derive(Debug, Clone, Copy)]
enum ServiceSignal {
    Recovered(ServiceName),
    Failed(ServiceName),
}

/// How a background pass ended
#[derive(Debug, Clone, PartialEq)]
enum PassOutcome {
    Merged { count: usize, rollback: bool },
    Skipped(ConnectivityMode),
}

/// Result of pushing a candidate unified set through validation
#[derive(Debug, Clone, Copy, PartialEq)]
struct CommitReport {
    count: usize,
    rollback: bool,
}

#[derive(Debug)]
pub struct ProgressiveLoader {
    backend: Arc<dyn CatalogBackend>,
    registry: Arc<ServiceStatusRegistry>,
    recovery: Arc<ErrorRecoveryEngine>,
    snapshots: Arc<dyn SnapshotStore>,
    settings: LoaderSettings,

    phases: Mutex<PhaseStateMachine>,
    state: RwLock<LoadingState>,
    unified: RwLock<Vec<MediaItem>>,
    metrics: RwLock<PerformanceMetrics>,
    cycle: AtomicU64,
    cycle_started: RwLock<Instant>,
    cycle_token: Mutex<CancellationToken>,
    background: Mutex<Option<JoinHandle<()>>>,

    /// Set while a background pass sleeps on a backoff
    retry_pending: AtomicBool,
    retry_now: Notify,
    shutdown: CancellationToken,

    events: Arc<EventBus<LoaderEvent>>,
    callbacks: CallbackSet<LoaderEvent>,
}

impl ProgressiveLoader {
    pub fn new(
        backend: Arc<dyn CatalogBackend>,
        registry: Arc<ServiceStatusRegistry>,
        recovery: Arc<ErrorRecoveryEngine>,
        snapshots: Arc<dyn SnapshotStore>,
        settings: LoaderSettings,
        events: Arc<EventBus<LoaderEvent>>,
    ) -> Self {
        Self {
            backend,
            registry,
            recovery,
            snapshots,
            settings,
            phases: Mutex::new(PhaseStateMachine::new()),
            state: RwLock::new(LoadingState::default()),
            unified: RwLock::new(Vec::new()),
            metrics: RwLock::new(PerformanceMetrics::default()),
            cycle: AtomicU64::new(0),
            cycle_started: RwLock::new(Instant::now()),
            cycle_token: Mutex::new(CancellationToken::new()),
            background: Mutex::new(None),
            retry_pending: AtomicBool::new(false),
            retry_now: Notify::new(),
            shutdown: CancellationToken::new(),
            events,
            callbacks: CallbackSet::new(),
        }
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<EventBus<LoaderEvent>> {
        &self.events
    }

    /// Listen for service health so pending backoffs are cut short, degraded
    /// cycles pick up remote data once the server is back, and failures seen
    /// by the monitor downgrade the visible mode.
    pub async fn start(self: &Arc<Self>) {
        let mut health = self
            .registry
            .events()
            .subscribe_to_kinds(vec!["service.recovered", "service.failed"]);
        let mut recovery = self
            .recovery
            .events()
            .subscribe_to_kinds(vec!["recovery.service_responding"]);
        let shutdown = self.shutdown.clone();
        let weak = Arc::downgrade(self);

        tokio::spawn(async move {
            info!("Progressive loader listening for service health");
            loop {
                let signal = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = health.recv() => match event {
                        Ok(event) => match event.payload {
                            HealthEvent::ServiceRecovered { service, .. } => ServiceSignal::Recovered(service),
                            HealthEvent::ServiceFailed { service, .. } => ServiceSignal::Failed(service),
                            _ => continue,
                        },
                        Err(SubscriberError::Lagged(n)) => {
                            warn!("Loader lagged {} health events", n);
                            continue;
                        }
                        Err(_) => break,
                    },
                    event = recovery.recv() => match event {
                        Ok(event) => match event.payload {
                            RecoveryEvent::ServiceResponding { service } => ServiceSignal::Recovered(service),
                            _ => continue,
                        },
                        Err(SubscriberError::Lagged(_)) => continue,
                        Err(_) => break,
                    },
                };

                let Some(loader) = weak.upgrade() else { break };
                match signal {
                    ServiceSignal::Recovered(service) => loader.handle_service_recovered(service).await,
                    ServiceSignal::Failed(service) => loader.handle_service_failed(service).await,
                }
            }
            debug!("Progressive loader health listener stopped");
        });
    }

    /// Downgrade the visible mode when a service the catalog needs goes away
    async fn handle_service_failed(&self, service: ServiceName) {
        let target = match service {
            ServiceName::Internet => ConnectivityMode::Offline,
            ServiceName::MediaServer => ConnectivityMode::Degraded,
            _ => return,
        };

        let changed = {
            let mut state = self.state.write().await;
            let downgrade = matches!(
                (state.mode, target),
                (ConnectivityMode::Online, _) | (ConnectivityMode::Degraded, ConnectivityMode::Offline)
            );
            if state.user_interaction_enabled && downgrade {
                state.mode = target;
                true
            } else {
                false
            }
        };

        if changed {
            warn!("{} failed, catalog now {}", service, target.as_str());
            self.emit(LoaderEvent::ModeChanged { mode: target }).await;
        }
    }

    async fn handle_service_recovered(self: &Arc<Self>, service: ServiceName) {
        if !matches!(service, ServiceName::Internet | ServiceName::MediaServer) {
            return;
        }

        if self.retry_pending.load(Ordering::SeqCst) {
            info!("{} recovered, cancelling pending backoff", service);
            self.retry_now.notify_waiters();
            return;
        }

        let (interactive, mode) = {
            let state = self.state.read().await;
            (state.user_interaction_enabled, state.mode)
        };
        if interactive && mode != ConnectivityMode::Online && !self.background_running().await {
            info!("{} recovered, loading remote data for a {} cycle", service, mode.as_str());
            self.retry_remote().await;
        }
    }

    /// Register a presentation hook; dropping the guard removes it
    #[must_use = "dropping the guard unregisters the callback"]
    pub fn on_event<F>(&self, callback: F) -> CallbackGuard
    where
        F: Fn(&LoaderEvent) + Send + Sync + 'static,
    {
        self.callbacks.register(callback)
    }

    async fn emit(&self, event: LoaderEvent) {
        self.callbacks.invoke(&event);
        self.events.publish(event).await;
    }

    /// Run a load cycle: returns once local data is presentable and leaves
    /// the background stage running.
    pub async fn load(self: &Arc<Self>) -> CatalogResult<Vec<MediaItem>> {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let token = {
            let mut current = self.cycle_token.lock().await;
            current.cancel();
            *current = self.shutdown.child_token();
            current.clone()
        };
        if let Some(previous) = self.background.lock().await.take() {
            previous.abort();
        }

        info!("Starting load cycle {}", cycle);
        *self.cycle_started.write().await = Instant::now();
        *self.state.write().await = LoadingState::new(cycle);
        *self.metrics.write().await = PerformanceMetrics::default();
        self.retry_pending.store(false, Ordering::SeqCst);
        self.recovery
            .reset_retries(&OperationId::unified_catalog())
            .await;
        self.phases.lock().await.reset();

        self.enter_phase(Phase::LoadingLocal, "local catalog requested")
            .await;
        self.state.write().await.local.state = SourceState::Loading;

        let items = match self.load_local_stage().await {
            Ok(items) => items,
            Err(e) => {
                self.fail_local_stage(&e).await;
                return Err(e);
            }
        };

        self.spawn_background(token).await;
        Ok(items)
    }

    async fn load_local_stage(&self) -> CatalogResult<Vec<MediaItem>> {
        let started = Instant::now();
        let op = OperationId::local_catalog();

        let live = match tokio::time::timeout(
            self.settings.local_timeout,
            self.backend.fetch_catalog(&CatalogQuery::local()),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response.media),
            Ok(Err(e)) => Err(CatalogError::from(e)),
            Err(_) => Err(CatalogError::timeout(
                op.as_str(),
                self.settings.local_timeout,
            )),
        };

        let (items, from_cache) = match live {
            Ok(items) => {
                info!("Local catalog loaded: {} items in {:?}", items.len(), started.elapsed());
                if let Err(e) = self.snapshots.save_items(SnapshotKind::Local, &items).await {
                    warn!("Failed to persist local snapshot: {:#}", e);
                }
                self.recovery
                    .cache_success(&op, Some(ServiceName::LocalMedia), Phase::LoadingLocal, &items)
                    .await;
                (items, false)
            }
            Err(e) => {
                warn!("Live local fetch failed: {}", e);
                self.record_error(
                    Phase::LoadingLocal,
                    &op,
                    "live local fetch",
                    &e,
                    true,
                    false,
                )
                .await;
                match self.cached_local_snapshot().await {
                    Some(items) => (items, true),
                    None => {
                        return Err(CatalogError::LocalUnavailable(format!(
                            "{} and no fresh local snapshot",
                            e
                        )));
                    }
                }
            }
        };

        let elapsed = started.elapsed();
        *self.unified.write().await = items.clone();
        {
            let mut state = self.state.write().await;
            state.local = SourceProgress {
                from_cache,
                ..SourceProgress::complete(items.len(), elapsed)
            };
            state.unified = SourceProgress {
                from_cache,
                ..SourceProgress::complete(items.len(), elapsed)
            };
        }

        self.enter_phase(Phase::LocalComplete, "local catalog presentable")
            .await;
        let since_start = self.cycle_started.read().await.elapsed();
        {
            let mut metrics = self.metrics.write().await;
            metrics.time_to_local_complete = Some(since_start);
            metrics.time_to_interactive = Some(since_start);
        }
        self.state.write().await.user_interaction_enabled = true;

        self.emit(LoaderEvent::LocalLoaded {
            items: items.clone(),
            from_cache,
        })
        .await;
        self.emit(LoaderEvent::UserInteractionEnabled).await;
        Ok(items)
    }

    async fn cached_local_snapshot(&self) -> Option<Vec<MediaItem>> {
        let window = self.settings.freshness.window(SnapshotKind::Local);
        match self.snapshots.load_fresh(SnapshotKind::Local, window).await {
            Ok(Some(snapshot)) => {
                info!(
                    "Using cached local snapshot: {} items, {:?} old",
                    snapshot.items.len(),
                    snapshot.age()
                );
                Some(snapshot.items)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read local snapshot: {:#}", e);
                None
            }
        }
    }

    async fn fail_local_stage(&self, error: &CatalogError) {
        error!("Load cycle failed: no presentable local data ({})", error);
        let elapsed = self.cycle_started.read().await.elapsed();
        self.state.write().await.local = SourceProgress::failed(error.to_string(), elapsed);
        self.record_error(
            Phase::LoadingLocal,
            &OperationId::local_catalog(),
            "local stage",
            error,
            false,
            false,
        )
        .await;
        self.enter_phase(Phase::Error, "local catalog unavailable")
            .await;
        self.emit(LoaderEvent::Error {
            phase: Phase::LoadingLocal,
            message: error.to_string(),
            class: error.class(),
            recoverable: false,
            persistent: true,
        })
        .await;
    }

    async fn spawn_background(self: &Arc<Self>, token: CancellationToken) {
        if !self.settings.remote_enabled {
            debug!("Remote loading disabled, finishing with local data");
            self.finish_phases("remote loading disabled").await;
            let items = self.unified_items().await;
            self.emit(LoaderEvent::Complete {
                items,
                mode: ConnectivityMode::Offline,
            })
            .await;
            self.state.write().await.mode = ConnectivityMode::Offline;
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_background(token).await });
        *self.background.lock().await = Some(handle);
    }

    async fn background_running(&self) -> bool {
        self.background
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait until no background pass is running
    pub async fn wait_for_background(&self) {
        loop {
            let handle = self.background.lock().await.take();
            match handle {
                Some(handle) => {
                    if let Err(e) = handle.await
                        && !e.is_cancelled()
                    {
                        error!("Background loading task failed: {}", e);
                    }
                }
                None => return,
            }
        }
    }

    /// Manual retry of the remote stage; returns false when there is nothing
    /// to retry yet.
    pub async fn retry_remote(self: &Arc<Self>) -> bool {
        if self.retry_pending.load(Ordering::SeqCst) {
            info!("Manual retry requested, skipping backoff");
            self.retry_now.notify_waiters();
            return true;
        }
        if self.background_running().await {
            debug!("Manual retry ignored: background pass already running");
            return false;
        }
        if !self.state.read().await.user_interaction_enabled {
            debug!("Manual retry ignored: local stage not complete");
            return false;
        }

        self.recovery
            .reset_retries(&OperationId::unified_catalog())
            .await;
        self.phases
            .lock()
            .await
            .reset_to(Phase::LocalComplete, "manual remote retry");
        self.state.write().await.phase = Phase::LocalComplete;
        let token = self.cycle_token.lock().await.clone();
        self.spawn_background(token).await;
        true
    }

    async fn run_background(self: Arc<Self>, token: CancellationToken) {
        self.state.write().await.background_tasks_active = true;
        self.emit(LoaderEvent::BackgroundTasksStarted).await;

        let op = OperationId::unified_catalog();
        let mut first_pass = true;
        loop {
            if !first_pass {
                self.phases
                    .lock()
                    .await
                    .reset_to(Phase::LocalComplete, "retrying remote stage");
                self.state.write().await.phase = Phase::LocalComplete;
            }
            first_pass = false;
            self.metrics.write().await.background_attempts += 1;

            let snapshot = self.unified_items().await;
            let pass = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Background stage cancelled");
                    break;
                }
                result = tokio::time::timeout(
                    self.settings.max_background_duration,
                    self.background_pass(&snapshot, &token),
                ) => match result {
                    Ok(result) => result,
                    Err(_) => Err(CatalogError::timeout(
                        "background stage",
                        self.settings.max_background_duration,
                    )),
                },
            };

            match pass {
                Ok(PassOutcome::Merged { count, rollback }) => {
                    info!(
                        "Background stage complete: {} unified items{}",
                        count,
                        if rollback { " (after rollback)" } else { "" }
                    );
                    self.recovery
                        .record_success(&op, Some(ServiceName::MediaServer))
                        .await;
                    break;
                }
                Ok(PassOutcome::Skipped(mode)) => {
                    info!("Background stage skipped: connectivity is {}", mode.as_str());
                    break;
                }
                Err(e) => {
                    self.restore_snapshot(&snapshot).await;
                    let phase = self.current_phase().await;
                    let context = ErrorContext::new(op.clone(), phase)
                        .with_service(ServiceName::MediaServer)
                        .with_query(CatalogQuery::unified());
                    let outcome = self.recovery.handle_loading_error(&e, &context).await;

                    match self.apply_recovery(&e, phase, &snapshot, outcome).await {
                        Some(delay) => {
                            if !self.wait_for_retry(delay, &token).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.retry_pending.store(false, Ordering::SeqCst);
        self.state.write().await.background_tasks_active = false;
        self.emit(LoaderEvent::BackgroundTasksCompleted).await;
    }

    /// One attempt at the remote stage
    async fn background_pass(
        &self,
        snapshot: &[MediaItem],
        token: &CancellationToken,
    ) -> CatalogResult<PassOutcome> {
        self.enter_phase(Phase::CheckingConnectivity, "checking connectivity")
            .await;

        let mode = self.precheck_connectivity().await;
        if mode != ConnectivityMode::Online {
            self.state.write().await.mode = mode;
            if mode == ConnectivityMode::Degraded {
                self.recovery
                    .start_recovery_monitor(ServiceName::MediaServer)
                    .await;
            }
            self.finish_phases("remote unavailable, keeping local data")
                .await;
            self.emit(LoaderEvent::Complete {
                items: snapshot.to_vec(),
                mode,
            })
            .await;
            return Ok(PassOutcome::Skipped(mode));
        }

        self.enter_phase(Phase::LoadingRemoteData, "fetching unified catalog")
            .await;
        self.state.write().await.remote.state = SourceState::Loading;

        let started = Instant::now();
        let remote = self
            .backend
            .fetch_catalog(&CatalogQuery::unified())
            .await
            .map_err(CatalogError::from)?
            .media;
        let elapsed = started.elapsed();
        info!("Unified catalog fetched: {} items in {:?}", remote.len(), elapsed);

        self.state.write().await.remote = SourceProgress::complete(remote.len(), elapsed);
        self.enter_phase(Phase::RemoteComplete, "unified catalog received")
            .await;
        self.emit(LoaderEvent::RemoteLoaded {
            count: remote.len(),
        })
        .await;
        if let Err(e) = self.snapshots.save_items(SnapshotKind::Remote, &remote).await {
            warn!("Failed to persist remote snapshot: {:#}", e);
        }
        self.recovery
            .cache_success(
                &OperationId::unified_catalog(),
                Some(ServiceName::MediaServer),
                Phase::LoadingRemoteData,
                &remote,
            )
            .await;

        if token.is_cancelled() {
            return Err(CatalogError::Unknown("load cycle superseded".to_string()));
        }

        self.enter_phase(Phase::MergingData, "merging local and remote")
            .await;
        let merged = merge_media_results(snapshot, &remote, self.settings.merge_strategy);
        debug!(
            "Merge: {} added, {} enhanced, {} duplicates, {} rejected",
            merged.added, merged.enhanced, merged.duplicates, merged.rejected
        );

        let report = self.commit(snapshot, &remote, merged.items).await;

        self.state.write().await.mode = ConnectivityMode::Online;
        {
            let since_start = self.cycle_started.read().await.elapsed();
            self.metrics.write().await.time_to_remote_complete = Some(since_start);
        }
        self.finish_phases("unified catalog ready").await;
        let items = self.unified_items().await;
        if let Err(e) = self.snapshots.save_items(SnapshotKind::Unified, &items).await {
            warn!("Failed to persist unified snapshot: {:#}", e);
        }
        self.emit(LoaderEvent::Complete {
            items,
            mode: ConnectivityMode::Online,
        })
        .await;

        Ok(PassOutcome::Merged {
            count: report.count,
            rollback: report.rollback,
        })
    }

    async fn precheck_connectivity(&self) -> ConnectivityMode {
        let internet = self
            .registry
            .check_service(ServiceName::Internet, CheckOptions::default())
            .await;
        if !internet.connected {
            return ConnectivityMode::Offline;
        }
        let server = self
            .registry
            .check_service(ServiceName::MediaServer, CheckOptions::default())
            .await;
        if !server.connected {
            return ConnectivityMode::Degraded;
        }
        ConnectivityMode::Online
    }

    /// Validate `candidate` against what is visible and publish it, rolling
    /// back to a conservative merge when validation fails.
    async fn commit(
        &self,
        snapshot: &[MediaItem],
        remote: &[MediaItem],
        candidate: Vec<MediaItem>,
    ) -> CommitReport {
        self.enter_phase(Phase::Validating, "validating merged catalog")
            .await;

        let additive = validate_remote_items_additive(snapshot, &candidate);
        let consistency = validate_media_item_consistency(snapshot, remote, &candidate);
        let mode_check = validate_mode_transition(CatalogMode::Local, CatalogMode::Unified, &candidate);
        if !mode_check.valid {
            debug!("Mode transition warnings: {:?}", mode_check.errors);
        }

        let strategy = self.settings.merge_strategy;
        if !consistency.valid && !consistency.rejects(strategy) {
            debug!(
                "{} field differences expected under {:?}",
                consistency.mismatches.len(),
                strategy
            );
        }

        let (items, rollback) = if additive.valid && !consistency.rejects(strategy) {
            (candidate, false)
        } else {
            let reason = if !additive.valid {
                format!(
                    "merge would remove {} visible items{}",
                    additive.removed.len(),
                    if additive.appears_replacement {
                        " (batch looks like a replacement)"
                    } else {
                        ""
                    }
                )
            } else {
                format!(
                    "{} local items missing, {} field mismatches",
                    consistency.missing_local.len(),
                    consistency.mismatches.len()
                )
            };
            warn!("Merge validation failed: {}; rolling back", reason);

            let error = CatalogError::Validation(reason);
            self.record_error(
                Phase::Validating,
                &OperationId::unified_catalog(),
                "post-merge validation",
                &error,
                true,
                true,
            )
            .await;
            self.emit(LoaderEvent::Error {
                phase: Phase::Validating,
                message: error.to_string(),
                class: ErrorClass::Validation,
                recoverable: true,
                persistent: false,
            })
            .await;

            (preserve_existing_items(snapshot, &candidate).items, true)
        };

        let count = self.publish_unified(snapshot, items).await;
        CommitReport { count, rollback }
    }

    /// Swap in the new unified set, keeping anything that became visible
    /// since `snapshot` was taken.
    async fn publish_unified(&self, snapshot: &[MediaItem], items: Vec<MediaItem>) -> usize {
        let mut unified = self.unified.write().await;
        let items = if unified.len() > snapshot.len() {
            preserve_existing_items(&unified, &items).items
        } else {
            items
        };
        let count = items.len();
        *unified = items;
        drop(unified);

        let mut state = self.state.write().await;
        state.unified.state = SourceState::Complete;
        state.unified.count = count;
        count
    }

    /// Merge an externally produced batch into the visible set
    ///
    /// Returns true when the batch was accepted without a rollback.
    pub async fn apply_merge_result(&self, incoming: Vec<MediaItem>) -> bool {
        let snapshot = self.unified_items().await;
        let additive = validate_remote_items_additive(&snapshot, &incoming);
        if additive.valid {
            self.publish_unified(&snapshot, incoming).await;
            return true;
        }

        warn!(
            "Merge batch would remove {} visible items; rolling back",
            additive.removed.len()
        );
        let error = CatalogError::Validation(format!(
            "merge batch missing {} previously visible items",
            additive.removed.len()
        ));
        let phase = self.current_phase().await;
        self.record_error(
            phase,
            &OperationId::unified_catalog(),
            "merge batch validation",
            &error,
            true,
            true,
        )
        .await;
        self.emit(LoaderEvent::Error {
            phase,
            message: error.to_string(),
            class: ErrorClass::Validation,
            recoverable: true,
            persistent: false,
        })
        .await;

        let restored = preserve_existing_items(&snapshot, &incoming).items;
        self.publish_unified(&snapshot, restored).await;
        false
    }

    async fn restore_snapshot(&self, snapshot: &[MediaItem]) {
        let mut unified = self.unified.write().await;
        let restored = preserve_existing_items(snapshot, &unified).items;
        if restored.len() != unified.len() {
            info!("Restored pre-stage snapshot ({} items)", snapshot.len());
        }
        *unified = restored;
    }

    /// Act on the engine's verdict; `Some(delay)` means wait and retry
    async fn apply_recovery(
        &self,
        error: &CatalogError,
        phase: Phase,
        snapshot: &[MediaItem],
        outcome: RecoveryOutcome,
    ) -> Option<Duration> {
        let op = OperationId::unified_catalog();

        if let Some(retry) = &outcome.retry {
            self.record_error(phase, &op, "background stage", error, true, false)
                .await;
            self.emit(LoaderEvent::Error {
                phase,
                message: outcome.message.clone(),
                class: outcome.class,
                recoverable: true,
                persistent: false,
            })
            .await;
            info!(
                "Retrying background stage in {:?} (attempt {})",
                retry.next_delay, retry.attempt_count
            );
            return Some(retry.next_delay);
        }

        if outcome.recovered {
            self.record_error(phase, &op, "background stage", error, true, false)
                .await;
            let mode = match &outcome.strategy {
                RecoveryStrategy::AlternateEndpoint { .. } => ConnectivityMode::Online,
                _ => ConnectivityMode::Degraded,
            };

            if let Some(data) = outcome.data.filter(|d| !d.is_empty()) {
                self.walk_to_merging("merging recovered data").await;
                let merged = merge_media_results(snapshot, &data, self.settings.merge_strategy);
                self.commit(snapshot, &data, merged.items).await;
            }
            if outcome.recommend_local_only {
                self.recovery
                    .start_recovery_monitor(ServiceName::MediaServer)
                    .await;
            }

            self.state.write().await.mode = mode;
            self.finish_phases("recovered from background failure")
                .await;
            // silent degrade: status indicator only
            self.emit(LoaderEvent::Error {
                phase,
                message: outcome.message,
                class: outcome.class,
                recoverable: true,
                persistent: false,
            })
            .await;
            let items = self.unified_items().await;
            self.emit(LoaderEvent::Complete { items, mode }).await;
            return None;
        }

        error!("Background stage failed permanently: {}", outcome.message);
        self.record_error(phase, &op, "background stage", error, false, false)
            .await;
        self.state.write().await.remote =
            SourceProgress::failed(outcome.message.clone(), Duration::ZERO);
        self.state.write().await.mode = ConnectivityMode::Degraded;
        self.enter_phase(Phase::Error, "background stage unrecoverable")
            .await;
        self.recovery
            .start_recovery_monitor(ServiceName::MediaServer)
            .await;
        self.emit(LoaderEvent::Error {
            phase,
            message: outcome.message,
            class: outcome.class,
            recoverable: false,
            persistent: true,
        })
        .await;
        None
    }

    /// Sleep out a backoff; a recovery event or manual retry ends it early.
    /// Returns false when the cycle was cancelled.
    async fn wait_for_retry(&self, delay: Duration, token: &CancellationToken) -> bool {
        // register for wakeups before advertising the pending backoff
        let interrupted = self.retry_now.notified();
        tokio::pin!(interrupted);
        interrupted.as_mut().enable();
        self.retry_pending.store(true, Ordering::SeqCst);

        let proceed = tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
            _ = &mut interrupted => {
                debug!("Backoff interrupted");
                true
            }
        };
        self.retry_pending.store(false, Ordering::SeqCst);
        proceed
    }

    async fn enter_phase(&self, phase: Phase, reason: &str) -> bool {
        let (applied, current) = {
            let mut phases = self.phases.lock().await;
            let applied = phases.transition(phase, Some(reason));
            (applied, phases.get_current_phase())
        };
        self.state.write().await.phase = current;
        self.emit(LoaderEvent::LoadingStateChange {
            phase: current,
            message: PhaseStateMachine::phase_message(current, None),
        })
        .await;
        applied
    }

    /// Walk to `unified_complete` through whatever steps the table demands
    async fn finish_phases(&self, reason: &str) {
        let current = self.current_phase().await;
        if current == Phase::LoadingRemoteData {
            self.enter_phase(Phase::RemoteComplete, reason).await;
        }
        if self.current_phase().await != Phase::UnifiedComplete {
            self.enter_phase(Phase::UnifiedComplete, reason).await;
        }
    }

    /// Step through the remaining fetch phases so a merge can start legally
    async fn walk_to_merging(&self, reason: &str) {
        for step in [Phase::LoadingRemoteData, Phase::RemoteComplete, Phase::MergingData] {
            let current = self.current_phase().await;
            if current == Phase::MergingData {
                break;
            }
            if PhaseStateMachine::is_valid_transition(current, step) {
                self.enter_phase(step, reason).await;
            }
        }
    }

    async fn current_phase(&self) -> Phase {
        self.phases.lock().await.get_current_phase()
    }

    async fn record_error(
        &self,
        phase: Phase,
        operation: &OperationId,
        context: &str,
        error: &CatalogError,
        recoverable: bool,
        rollback_performed: bool,
    ) {
        let entry = LoadErrorEntry {
            timestamp: chrono::Utc::now(),
            phase,
            operation: operation.clone(),
            context: context.to_string(),
            message: error.to_string(),
            class: error.class(),
            recoverable,
            rollback_performed,
        };
        if recoverable {
            warn!(
                "[{}] {} during {} ({}, recoverable): {}",
                entry.timestamp, context, phase, entry.class, entry.message
            );
        } else {
            error!(
                "[{}] {} during {} ({}, unrecoverable): {}",
                entry.timestamp, context, phase, entry.class, entry.message
            );
        }
        self.state.write().await.errors.push(entry);
    }

    pub async fn loading_state(&self) -> LoadingState {
        self.state.read().await.clone()
    }

    pub async fn unified_items(&self) -> Vec<MediaItem> {
        self.unified.read().await.clone()
    }

    pub async fn connectivity_mode(&self) -> ConnectivityMode {
        self.state.read().await.mode
    }

    pub async fn metrics(&self) -> PerformanceMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn phase_history(&self) -> Vec<super::phase::PhaseTransition> {
        self.phases.lock().await.get_phase_history().to_vec()
    }

    /// Cancel background work and recovery monitors
    pub async fn shutdown(&self) {
        info!("Shutting down progressive loader");
        self.shutdown.cancel();
        self.cycle_token.lock().await.cancel();
        if let Some(handle) = self.background.lock().await.take() {
            let _ = handle.await;
        }
        self.recovery.stop_recovery_monitors().await;
    }
}

impl Drop for ProgressiveLoader {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
