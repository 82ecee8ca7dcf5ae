pub mod builders;
pub mod mocks;

use rv_catalog::events::{EventBus, LoaderEvent};
use rv_catalog::models::{MediaItem, ServiceName};
use rv_catalog::services::recovery::{ErrorRecoveryEngine, RecoverySettings, RetryPolicy};
use rv_catalog::services::snapshot_store::{MemorySnapshotStore, SnapshotStore};
use rv_catalog::services::status::{ServiceStatusRegistry, StatusSettings};
use rv_catalog::services::{LoaderSettings, ProgressiveLoader};
use std::sync::Arc;
use std::time::Duration;

use mocks::{MockBackend, ScriptedProbe};

/// Loader wired to a mock backend and scripted probes
pub struct TestHarness {
    pub backend: Arc<MockBackend>,
    pub internet: Arc<ScriptedProbe>,
    pub media_server: Arc<ScriptedProbe>,
    pub registry: Arc<ServiceStatusRegistry>,
    pub recovery: Arc<ErrorRecoveryEngine>,
    pub loader: Arc<ProgressiveLoader>,
    pub events: Arc<EventBus<LoaderEvent>>,
}

pub struct HarnessBuilder {
    local: Vec<MediaItem>,
    unified: Vec<MediaItem>,
    internet_up: bool,
    server_up: bool,
    retry: RetryPolicy,
    recovery: RecoverySettings,
    loader: LoaderSettings,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl HarnessBuilder {
    pub fn new(local: Vec<MediaItem>, unified: Vec<MediaItem>) -> Self {
        Self {
            local,
            unified,
            internet_up: true,
            server_up: true,
            retry: RetryPolicy::new(3, 20, 2.0, 200),
            recovery: RecoverySettings {
                recovery_probe_interval: Duration::from_millis(20),
                ..Default::default()
            },
            loader: LoaderSettings {
                local_timeout: Duration::from_millis(500),
                max_background_duration: Duration::from_secs(5),
                ..Default::default()
            },
            snapshots: None,
        }
    }

    pub fn offline(mut self) -> Self {
        self.internet_up = false;
        self
    }

    pub fn server_down(mut self) -> Self {
        self.server_up = false;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn recovery(mut self, settings: RecoverySettings) -> Self {
        self.recovery = settings;
        self
    }

    pub fn loader(mut self, settings: LoaderSettings) -> Self {
        self.loader = settings;
        self
    }

    pub fn snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn build(self) -> TestHarness {
        let backend = Arc::new(MockBackend::new(self.local, self.unified));
        let internet = ScriptedProbe::new(ServiceName::Internet, self.internet_up);
        let media_server = ScriptedProbe::new(ServiceName::MediaServer, self.server_up);

        // no read-through caching so flipped probes take effect immediately
        let registry = Arc::new(
            ServiceStatusRegistry::new(
                StatusSettings {
                    cache_ttl: Duration::ZERO,
                    ..Default::default()
                },
                Arc::new(EventBus::new(256)),
            )
            .with_probe(internet.clone())
            .with_probe(media_server.clone()),
        );

        let recovery = Arc::new(ErrorRecoveryEngine::new(
            self.recovery,
            self.retry,
            registry.clone(),
            Arc::new(EventBus::new(256)),
        ));

        let events = Arc::new(EventBus::new(1024));
        let snapshots = self
            .snapshots
            .unwrap_or_else(|| Arc::new(MemorySnapshotStore::new()));
        let loader = Arc::new(ProgressiveLoader::new(
            backend.clone(),
            registry.clone(),
            recovery.clone(),
            snapshots,
            self.loader,
            events.clone(),
        ));

        TestHarness {
            backend,
            internet,
            media_server,
            registry,
            recovery,
            loader,
            events,
        }
    }
}

impl TestHarness {
    /// Wait for the background stage, failing the test if it hangs
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.loader.wait_for_background())
            .await
            .expect("background stage did not finish");
    }
}
