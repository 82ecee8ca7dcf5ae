use rv_catalog::backends::ApiError;
use rv_catalog::events::LoaderEvent;
use rv_catalog::models::{
    Availability, ConnectivityMode, OperationId, Phase, ProbeMethod, ServiceName, SourceState,
};
use rv_catalog::services::monitor::{MonitorSettings, PollingStrategy, ServiceState};
use rv_catalog::services::recovery::RetryPolicy;
use rv_catalog::services::snapshot_store::{
    CatalogSnapshot, SnapshotKind, SnapshotStore, SqliteSnapshotStore,
};
use rv_catalog::services::status::{
    CheckOptions, NetworkProbe, ReachabilityCheck, ServiceStatusRegistry, StatusSettings,
};
use rv_catalog::events::EventBus;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use crate::common::HarnessBuilder;
use crate::common::builders::{count_available, local_items, remote_items};
use crate::common::mocks::{FailingCheck, ScriptedProbe};

#[tokio::test]
async fn test_local_then_remote_merge() {
    let harness = HarnessBuilder::new(local_items(10), remote_items(15, 4)).build();

    let local = harness.loader.load().await.unwrap();
    assert_eq!(local.len(), 10);
    assert!(harness.loader.loading_state().await.user_interaction_enabled);

    harness.settle().await;

    let unified = harness.loader.unified_items().await;
    assert_eq!(unified.len(), 21);
    assert_eq!(unified.iter().filter(|item| item.enhanced).count(), 4);
    assert_eq!(count_available(&unified, Availability::Both), 4);
    assert_eq!(count_available(&unified, Availability::RemoteOnly), 11);

    // overlapping records keep their local identity
    let first = unified.iter().find(|item| item.id == "m0").unwrap();
    assert_eq!(first.title, "Local Movie 0");
    assert_eq!(first.jellyfin_id.as_deref(), Some("jf-m0"));

    let state = harness.loader.loading_state().await;
    assert_eq!(state.phase, Phase::UnifiedComplete);
    assert_eq!(state.mode, ConnectivityMode::Online);
    assert_eq!(state.unified.count, 21);
    assert!(state.errors.is_empty());

    let metrics = harness.loader.metrics().await;
    assert!(metrics.time_to_interactive.is_some());
    assert!(metrics.time_to_remote_complete >= metrics.time_to_local_complete);
}

#[tokio::test]
async fn test_interaction_is_enabled_before_background_starts() {
    let harness = HarnessBuilder::new(local_items(2), remote_items(3, 0)).build();
    let mut events = harness.events.subscribe();

    harness.loader.load().await.unwrap();
    harness.settle().await;

    let order: Vec<&'static str> = events
        .drain()
        .into_iter()
        .filter_map(|event| match event.payload {
            LoaderEvent::LocalLoaded { .. } => Some("local"),
            LoaderEvent::UserInteractionEnabled => Some("interactive"),
            LoaderEvent::BackgroundTasksStarted => Some("background"),
            LoaderEvent::RemoteLoaded { .. } => Some("remote"),
            LoaderEvent::Complete { .. } => Some("complete"),
            LoaderEvent::BackgroundTasksCompleted => Some("done"),
            _ => None,
        })
        .collect();
    assert_eq!(
        order,
        vec!["local", "interactive", "background", "remote", "complete", "done"]
    );
}

#[tokio::test]
async fn test_local_failure_served_from_sqlite_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        SqliteSnapshotStore::open(&dir.path().join("snapshots.db"))
            .await
            .unwrap(),
    );
    store
        .save(
            SnapshotKind::Local,
            &CatalogSnapshot {
                items: local_items(8),
                timestamp: chrono::Utc::now() - chrono::Duration::minutes(2),
            },
        )
        .await
        .unwrap();

    let harness = HarnessBuilder::new(Vec::new(), Vec::new())
        .offline()
        .snapshots(store)
        .build();
    harness
        .backend
        .fail_local(ApiError::Network("connection refused".to_string()));

    let items = harness.loader.load().await.unwrap();
    assert_eq!(items.len(), 8);

    let state = harness.loader.loading_state().await;
    assert_eq!(state.local.state, SourceState::Complete);
    assert!(state.local.from_cache);
    assert!(state.user_interaction_enabled);
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].operation, OperationId::local_catalog());
}

#[tokio::test]
async fn test_stale_snapshot_is_not_used() {
    let store = Arc::new(rv_catalog::services::MemorySnapshotStore::new());
    store
        .save(
            SnapshotKind::Local,
            &CatalogSnapshot {
                items: local_items(8),
                timestamp: chrono::Utc::now() - chrono::Duration::minutes(45),
            },
        )
        .await
        .unwrap();

    let harness = HarnessBuilder::new(Vec::new(), Vec::new())
        .snapshots(store)
        .build();
    harness.backend.delay_local(Duration::from_secs(2));

    let err = harness.loader.load().await.unwrap_err();
    assert!(err.to_string().contains("no fresh local snapshot"));
    assert_eq!(harness.loader.loading_state().await.phase, Phase::Error);
}

#[tokio::test]
async fn test_network_down_skips_media_server_probe() {
    let calls = Arc::new(AtomicUsize::new(0));
    let checks: Vec<Box<dyn ReachabilityCheck>> = [ProbeMethod::Dns, ProbeMethod::Http, ProbeMethod::Socket]
        .into_iter()
        .map(|method| {
            Box::new(FailingCheck {
                method,
                calls: calls.clone(),
            }) as Box<dyn ReachabilityCheck>
        })
        .collect();

    let media_server = ScriptedProbe::new(ServiceName::MediaServer, true);
    let registry = ServiceStatusRegistry::new(StatusSettings::default(), Arc::new(EventBus::new(16)))
        .with_probe(Arc::new(NetworkProbe::new(checks)))
        .with_probe(media_server.clone());

    let internet = registry
        .check_service(ServiceName::Internet, CheckOptions::forced())
        .await;
    assert!(!internet.connected);
    assert_eq!(internet.method, ProbeMethod::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let error = internet.error.unwrap();
    assert!(error.contains("dns") && error.contains("http") && error.contains("socket"));

    let server = registry
        .check_service(ServiceName::MediaServer, CheckOptions::default())
        .await;
    assert!(!server.connected);
    assert_eq!(server.error.as_deref(), Some("no internet"));
    assert_eq!(media_server.calls(), 0);
}

#[test]
fn test_polling_strategy_follows_counters() {
    let settings = MonitorSettings::default();
    let mut state = ServiceState::new(&settings);

    for _ in 0..3 {
        state.apply_result(false, false, &settings);
    }
    assert_eq!(state.polling_strategy, PollingStrategy::Fast);

    for _ in 0..5 {
        state.apply_result(true, false, &settings);
    }
    assert_eq!(state.polling_strategy, PollingStrategy::Slow);
}

#[tokio::test]
async fn test_rejected_batch_restores_visible_items() {
    let harness = HarnessBuilder::new(local_items(6), Vec::new())
        .offline()
        .build();
    harness.loader.load().await.unwrap();
    harness.settle().await;

    let before = harness.loader.unified_items().await;
    let mut batch = before.clone();
    batch.remove(4);
    batch.remove(1);
    batch.extend(remote_items(2, 0));

    assert!(!harness.loader.apply_merge_result(batch).await);

    let after = harness.loader.unified_items().await;
    for item in &before {
        assert!(after.iter().any(|other| other.id == item.id), "{} lost", item.id);
    }
    assert_eq!(after.len(), 8);

    let state = harness.loader.loading_state().await;
    let rollback = state.errors.iter().find(|e| e.rollback_performed).unwrap();
    assert!(rollback.recoverable);
    assert!(rollback.message.contains("2 previously visible items"));
}

#[test]
fn test_backoff_delay_at_attempt_three() {
    let policy = RetryPolicy::new(5, 1000, 2.0, 30_000);
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
}
