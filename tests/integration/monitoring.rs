use rv_catalog::events::{EventBus, HealthEvent};
use rv_catalog::models::ServiceName;
use rv_catalog::services::monitor::{
    ActivityTracker, BackgroundHealthMonitor, MonitorOptions, MonitorSettings,
};
use rv_catalog::services::status::{ServiceStatusRegistry, StatusSettings};
use std::sync::Arc;
use std::time::Duration;

use crate::common::mocks::ScriptedProbe;

struct Fixture {
    internet: Arc<ScriptedProbe>,
    media_server: Arc<ScriptedProbe>,
    registry: Arc<ServiceStatusRegistry>,
    monitor: Arc<BackgroundHealthMonitor>,
    activity: Arc<ActivityTracker>,
}

fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        stable_threshold: 5,
        unstable_threshold: 3,
        slow_interval: Duration::from_millis(60),
        normal_interval: Duration::from_millis(30),
        fast_interval: Duration::from_millis(15),
        min_interval: Duration::from_millis(10),
        max_interval: Duration::from_secs(1),
        idle_timeout: Duration::from_secs(3600),
        idle_interval: Duration::from_millis(500),
        idle_check_interval: Duration::from_millis(50),
    }
}

fn fixture(settings: MonitorSettings, skip_window: Duration) -> Fixture {
    let internet = ScriptedProbe::new(ServiceName::Internet, true);
    let media_server = ScriptedProbe::new(ServiceName::MediaServer, true);

    let registry = Arc::new(
        ServiceStatusRegistry::new(
            StatusSettings {
                cache_ttl: Duration::ZERO,
                skip_window,
                ..Default::default()
            },
            Arc::new(EventBus::new(64)),
        )
        .with_probe(internet.clone())
        .with_probe(media_server.clone()),
    );

    let activity = Arc::new(ActivityTracker::new());
    activity.record_activity();
    let monitor = Arc::new(BackgroundHealthMonitor::new(
        registry.clone(),
        settings,
        activity.clone(),
    ));

    Fixture {
        internet,
        media_server,
        registry,
        monitor,
        activity,
    }
}

#[tokio::test]
async fn test_scheduled_checks_report_failure_inside_skip_window() {
    let fx = fixture(fast_settings(), Duration::from_secs(300));
    let mut events = fx
        .registry
        .events()
        .subscribe_to_kinds(vec!["service.failed", "service.recovered"]);

    fx.monitor
        .start_monitoring(
            &[ServiceName::MediaServer],
            MonitorOptions {
                check_immediately: true,
            },
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // the first success opened a five minute window
    assert!(fx.registry.skip_window_remaining(ServiceName::MediaServer).await.is_some());

    fx.media_server.set_up(false);
    let failed = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no failure event")
        .unwrap();
    assert!(matches!(
        failed.payload,
        HealthEvent::ServiceFailed {
            service: ServiceName::MediaServer,
            ..
        }
    ));
    assert!(fx.registry.skip_window_remaining(ServiceName::MediaServer).await.is_none());

    fx.media_server.set_up(true);
    let recovered = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no recovery event")
        .unwrap();
    match recovered.payload {
        HealthEvent::ServiceRecovered { service, downtime } => {
            assert_eq!(service, ServiceName::MediaServer);
            assert!(downtime.is_some());
        }
        other => panic!("unexpected event {:?}", other),
    }

    // recovery re-opens the skip window and clears the failure streak
    assert!(fx.registry.skip_window_remaining(ServiceName::MediaServer).await.is_some());
    let status = fx.monitor.get_monitoring_status().await;
    assert!(status.active);
    assert_eq!(status.services[&ServiceName::MediaServer].consecutive_failures, 0);

    fx.monitor.stop_monitoring(None).await;
    assert!(!fx.monitor.get_monitoring_status().await.active);
}

#[tokio::test]
async fn test_force_immediate_check_covers_every_service() {
    let fx = fixture(MonitorSettings::default(), Duration::ZERO);

    // nothing scheduled yet, so every registered service is checked
    let results = fx.monitor.force_immediate_check().await;
    assert_eq!(results.len(), 2);
    assert!(results.values().all(|s| s.connected));
    assert_eq!(fx.internet.calls(), 1);
    assert_eq!(fx.media_server.calls(), 1);

    fx.monitor
        .start_monitoring(
            &[ServiceName::Internet, ServiceName::MediaServer],
            MonitorOptions::default(),
        )
        .await;
    let mut failures = fx.registry.events().subscribe_to_kinds(vec!["service.failed"]);

    fx.monitor.force_immediate_check().await;
    assert_eq!(fx.internet.calls(), 2);
    assert_eq!(fx.media_server.calls(), 2);

    fx.internet.set_up(false);
    let results = fx.monitor.force_immediate_check().await;

    // the media server rides on the internet result of the same sweep
    assert!(!results[&ServiceName::Internet].connected);
    assert!(!results[&ServiceName::MediaServer].connected);
    assert!(results[&ServiceName::MediaServer].was_skipped());
    assert_eq!(fx.internet.calls(), 3);
    assert_eq!(fx.media_server.calls(), 2);

    let failed: Vec<ServiceName> = failures
        .drain()
        .into_iter()
        .filter_map(|e| match e.payload {
            HealthEvent::ServiceFailed { service, .. } => Some(service),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![ServiceName::Internet, ServiceName::MediaServer]);

    let status = fx.monitor.get_monitoring_status().await;
    assert_eq!(status.services[&ServiceName::Internet].consecutive_failures, 1);
    assert_eq!(status.services[&ServiceName::MediaServer].consecutive_failures, 1);

    fx.monitor.stop_monitoring(None).await;
}

#[tokio::test]
async fn test_stopping_one_service_leaves_the_rest_running() {
    let fx = fixture(fast_settings(), Duration::ZERO);
    fx.monitor
        .start_monitoring(
            &[ServiceName::Internet, ServiceName::MediaServer],
            MonitorOptions {
                check_immediately: true,
            },
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    fx.monitor.stop_monitoring(Some(ServiceName::MediaServer)).await;
    let status = fx.monitor.get_monitoring_status().await;
    assert!(status.active);
    assert!(!status.services[&ServiceName::MediaServer].enabled);
    assert!(status.services[&ServiceName::Internet].enabled);

    let server_calls = fx.media_server.calls();
    let internet_calls = fx.internet.calls();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(fx.media_server.calls(), server_calls);
    assert!(fx.internet.calls() > internet_calls);

    let results = fx.monitor.force_immediate_check().await;
    assert!(results.contains_key(&ServiceName::Internet));
    assert!(!results.contains_key(&ServiceName::MediaServer));

    fx.monitor.stop_monitoring(None).await;
}

#[tokio::test]
async fn test_idle_user_stretches_intervals() {
    let settings = MonitorSettings {
        idle_timeout: Duration::from_millis(20),
        idle_check_interval: Duration::from_secs(60),
        ..fast_settings()
    };
    let fx = fixture(settings, Duration::ZERO);
    let mut idle_events = fx
        .registry
        .events()
        .subscribe_to_kinds(vec!["monitor.idle_changed"]);

    fx.monitor
        .start_monitoring(&[ServiceName::Internet], MonitorOptions::default())
        .await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(fx.monitor.update_idle_state().await);
    let status = fx.monitor.get_monitoring_status().await;
    assert!(status.idle);
    assert_eq!(
        status.services[&ServiceName::Internet].current_interval,
        Duration::from_millis(500)
    );

    fx.activity.record_activity();
    assert!(!fx.monitor.update_idle_state().await);
    assert_eq!(
        fx.monitor.get_monitoring_status().await.services[&ServiceName::Internet].current_interval,
        Duration::from_millis(30)
    );

    let changes: Vec<bool> = idle_events
        .drain()
        .into_iter()
        .filter_map(|e| match e.payload {
            HealthEvent::IdleChanged { idle } => Some(idle),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![true, false]);

    fx.monitor.stop_monitoring(None).await;
}
