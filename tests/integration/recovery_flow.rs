use rv_catalog::backends::ApiError;
use rv_catalog::events::{HealthEvent, LoaderEvent};
use rv_catalog::models::{ConnectivityMode, OperationId, Phase, ServiceName};
use rv_catalog::services::monitor::{
    ActivityTracker, BackgroundHealthMonitor, MonitorOptions, MonitorSettings,
};
use rv_catalog::services::recovery::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::common::HarnessBuilder;
use crate::common::builders::{local_items, remote_items};

async fn wait_until<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let harness = HarnessBuilder::new(local_items(10), remote_items(15, 4)).build();
    harness
        .backend
        .queue_unified(Err(ApiError::Network("connection reset".to_string())));
    harness
        .backend
        .queue_unified(Err(ApiError::Network("connection reset".to_string())));

    harness.loader.load().await.unwrap();
    harness.settle().await;

    assert_eq!(harness.backend.unified_calls(), 3);
    assert_eq!(harness.loader.unified_items().await.len(), 21);

    let state = harness.loader.loading_state().await;
    assert_eq!(state.phase, Phase::UnifiedComplete);
    assert_eq!(state.mode, ConnectivityMode::Online);
    assert_eq!(state.errors.len(), 2);
    assert!(state.errors.iter().all(|e| e.recoverable && !e.rollback_performed));

    assert_eq!(harness.loader.metrics().await.background_attempts, 3);
    assert!(
        harness
            .recovery
            .active_retry(&OperationId::unified_catalog())
            .await
            .is_none()
    );

    // each retry pass is re-seated explicitly
    let resets = harness
        .loader
        .phase_history()
        .await
        .iter()
        .filter(|t| t.reason.as_deref() == Some("retrying remote stage"))
        .count();
    assert_eq!(resets, 2);
}

#[tokio::test]
async fn test_service_recovery_cuts_backoff_short() {
    let harness = HarnessBuilder::new(local_items(3), remote_items(5, 1))
        .retry(RetryPolicy::new(3, 10_000, 2.0, 30_000))
        .build();
    harness
        .backend
        .queue_unified(Err(ApiError::Network("refused".to_string())));
    harness.loader.start().await;

    let mut errors = harness.events.subscribe_to_kinds(vec!["loader.error"]);
    harness.loader.load().await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        first.payload,
        LoaderEvent::Error {
            recoverable: true,
            persistent: false,
            ..
        }
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    harness
        .registry
        .events()
        .publish(HealthEvent::ServiceRecovered {
            service: ServiceName::MediaServer,
            downtime: Some(Duration::from_secs(1)),
        })
        .await;

    tokio::time::timeout(Duration::from_secs(3), harness.loader.wait_for_background())
        .await
        .expect("retry did not run after recovery");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(harness.loader.unified_items().await.len(), 7);
    assert_eq!(harness.backend.unified_calls(), 2);

    harness.loader.shutdown().await;
}

#[tokio::test]
async fn test_permanent_failure_keeps_local_items() {
    let harness = HarnessBuilder::new(local_items(4), Vec::new()).build();
    harness.backend.set_unified(Err(ApiError::ClientError {
        status: 400,
        message: "bad mode".to_string(),
    }));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _guard = harness.loader.on_event(move |event| {
        if let LoaderEvent::Error {
            persistent,
            recoverable,
            ..
        } = event
        {
            sink.lock().unwrap().push((*recoverable, *persistent));
        }
    });

    harness.loader.load().await.unwrap();
    harness.settle().await;

    assert_eq!(harness.backend.unified_calls(), 1);
    assert_eq!(harness.loader.unified_items().await.len(), 4);

    let state = harness.loader.loading_state().await;
    assert_eq!(state.phase, Phase::Error);
    assert_eq!(state.mode, ConnectivityMode::Degraded);
    assert!(state.user_interaction_enabled);
    assert!(state.errors.iter().any(|e| !e.recoverable));
    assert_eq!(seen.lock().unwrap().as_slice(), &[(false, true)]);

    harness.loader.shutdown().await;
}

#[tokio::test]
async fn test_timeout_falls_back_to_cached_remote_data() {
    let harness = HarnessBuilder::new(local_items(10), remote_items(15, 4)).build();
    harness.loader.load().await.unwrap();
    harness.settle().await;
    assert_eq!(harness.loader.unified_items().await.len(), 21);

    harness
        .backend
        .set_unified(Err(ApiError::Timeout("read timed out".to_string())));
    harness.loader.load().await.unwrap();
    harness.settle().await;

    assert_eq!(harness.loader.unified_items().await.len(), 21);
    let state = harness.loader.loading_state().await;
    assert_eq!(state.cycle, 2);
    assert_eq!(state.phase, Phase::UnifiedComplete);
    assert_eq!(state.mode, ConnectivityMode::Degraded);
    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].recoverable);
}

#[tokio::test]
async fn test_degraded_cycle_reloads_when_server_returns() {
    let harness = HarnessBuilder::new(local_items(3), remote_items(6, 2))
        .server_down()
        .build();
    harness.loader.start().await;

    harness.loader.load().await.unwrap();
    harness.settle().await;
    assert_eq!(harness.loader.connectivity_mode().await, ConnectivityMode::Degraded);
    assert_eq!(harness.loader.unified_items().await.len(), 3);
    assert_eq!(harness.backend.unified_calls(), 0);

    harness.media_server.set_up(true);
    let loader = harness.loader.clone();
    let merged = wait_until(Duration::from_secs(3), || {
        let loader = loader.clone();
        async move { loader.unified_items().await.len() == 7 }
    })
    .await;
    assert!(merged, "remote data was not loaded after recovery");

    harness.settle().await;
    assert_eq!(harness.loader.connectivity_mode().await, ConnectivityMode::Online);
    harness.loader.shutdown().await;
}

#[tokio::test]
async fn test_manual_retry_after_offline_cycle() {
    let harness = HarnessBuilder::new(local_items(2), remote_items(4, 0))
        .offline()
        .build();
    harness.loader.load().await.unwrap();
    harness.settle().await;
    assert_eq!(harness.loader.connectivity_mode().await, ConnectivityMode::Offline);

    harness.internet.set_up(true);
    assert!(harness.loader.retry_remote().await);
    harness.settle().await;

    assert_eq!(harness.loader.unified_items().await.len(), 6);
    assert_eq!(harness.loader.loading_state().await.phase, Phase::UnifiedComplete);
}

#[tokio::test]
async fn test_monitored_failures_downgrade_visible_mode() {
    let harness = HarnessBuilder::new(local_items(3), remote_items(4, 1)).build();
    harness.loader.start().await;
    let mut mode_changes = harness.events.subscribe_to_kinds(vec!["loader.mode_changed"]);

    harness.loader.load().await.unwrap();
    harness.settle().await;
    assert_eq!(harness.loader.connectivity_mode().await, ConnectivityMode::Online);

    let monitor = Arc::new(BackgroundHealthMonitor::new(
        harness.registry.clone(),
        MonitorSettings::default(),
        Arc::new(ActivityTracker::new()),
    ));
    monitor
        .start_monitoring(
            &[ServiceName::Internet, ServiceName::MediaServer],
            MonitorOptions::default(),
        )
        .await;
    monitor.force_immediate_check().await;

    harness.media_server.set_up(false);
    monitor.force_immediate_check().await;
    let changed = tokio::time::timeout(Duration::from_secs(2), mode_changes.recv())
        .await
        .expect("no mode change after media server failure")
        .unwrap();
    assert!(matches!(
        changed.payload,
        LoaderEvent::ModeChanged {
            mode: ConnectivityMode::Degraded
        }
    ));
    assert_eq!(harness.loader.connectivity_mode().await, ConnectivityMode::Degraded);
    assert_eq!(harness.loader.unified_items().await.len(), 6);

    harness.internet.set_up(false);
    monitor.force_immediate_check().await;
    let changed = tokio::time::timeout(Duration::from_secs(2), mode_changes.recv())
        .await
        .expect("no mode change after internet failure")
        .unwrap();
    assert!(matches!(
        changed.payload,
        LoaderEvent::ModeChanged {
            mode: ConnectivityMode::Offline
        }
    ));
    assert_eq!(harness.loader.connectivity_mode().await, ConnectivityMode::Offline);

    monitor.stop_monitoring(None).await;
    harness.loader.shutdown().await;
}

#[tokio::test]
async fn test_new_cycle_starts_with_fresh_retry_budget() {
    let harness = HarnessBuilder::new(local_items(3), remote_items(5, 1))
        .retry(RetryPolicy::new(3, 10_000, 2.0, 30_000))
        .build();
    let op = OperationId::unified_catalog();
    let mut errors = harness.events.subscribe_to_kinds(vec!["loader.error"]);

    harness
        .backend
        .queue_unified(Err(ApiError::Network("refused".to_string())));
    harness.loader.load().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), errors.recv())
        .await
        .expect("first cycle did not fail")
        .unwrap();
    let attempts = harness.recovery.active_retry(&op).await.map(|r| r.attempt_count);
    assert_eq!(attempts, Some(1));

    // supersede the cycle while its backoff is still pending
    harness
        .backend
        .queue_unified(Err(ApiError::Network("refused".to_string())));
    harness.loader.load().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), errors.recv())
        .await
        .expect("second cycle did not fail")
        .unwrap();

    assert_eq!(harness.backend.unified_calls(), 2);
    let attempts = harness.recovery.active_retry(&op).await.map(|r| r.attempt_count);
    assert_eq!(attempts, Some(1));
    assert_eq!(harness.loader.loading_state().await.cycle, 2);

    harness.loader.shutdown().await;
}
