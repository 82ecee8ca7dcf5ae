use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backends::{CatalogBackend, HttpCatalogBackend};
use crate::config::Config;
use crate::events::EventBus;
use crate::models::{MediaItem, ServiceName};
use crate::services::monitor::{ActivityTracker, BackgroundHealthMonitor, MonitorOptions};
use crate::services::recovery::ErrorRecoveryEngine;
use crate::services::snapshot_store::{MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
use crate::services::status::{
    DirectHttpProbe, DnsCheck, EndpointServiceProbe, HttpCheck, NetworkProbe, ServiceProbe,
    ServiceStatusRegistry, TcpCheck,
};
use crate::services::ProgressiveLoader;

const EVENT_CAPACITY: usize = 256;

/// Every collaborator, built once from a [`Config`] and passed by reference
pub struct CatalogApp {
    config: Arc<Config>,
    registry: Arc<ServiceStatusRegistry>,
    monitor: Arc<BackgroundHealthMonitor>,
    recovery: Arc<ErrorRecoveryEngine>,
    loader: Arc<ProgressiveLoader>,
    activity: Arc<ActivityTracker>,
}

impl CatalogApp {
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let backend: Arc<dyn CatalogBackend> = Arc::new(
            HttpCatalogBackend::new(&config.catalog.base_url, config.request_timeout())
                .context("Failed to create catalog backend")?,
        );

        let mut registry =
            ServiceStatusRegistry::new(config.status_settings(), Arc::new(EventBus::new(EVENT_CAPACITY)));
        for probe in Self::build_probes(&config, &backend) {
            registry = registry.with_probe(probe);
        }
        let registry = Arc::new(registry);

        let activity = Arc::new(ActivityTracker::new());
        let monitor = Arc::new(BackgroundHealthMonitor::new(
            registry.clone(),
            config.monitor_settings(),
            activity.clone(),
        ));

        let mut recovery = ErrorRecoveryEngine::new(
            config.recovery_settings(),
            config.retry_policy(),
            registry.clone(),
            Arc::new(EventBus::new(EVENT_CAPACITY)),
        );
        if let Some(alternate) = &config.catalog.alternate_url {
            let backend = HttpCatalogBackend::with_name(alternate, config.request_timeout(), "alternate")
                .context("Failed to create alternate catalog backend")?;
            recovery = recovery.with_alternate(Arc::new(backend));
        }
        let recovery = Arc::new(recovery);

        let snapshots = Self::open_snapshot_store(&config).await;
        let loader = Arc::new(ProgressiveLoader::new(
            backend,
            registry.clone(),
            recovery.clone(),
            snapshots,
            config.loader_settings(),
            Arc::new(EventBus::new(EVENT_CAPACITY)),
        ));

        Ok(Self {
            config,
            registry,
            monitor,
            recovery,
            loader,
            activity,
        })
    }

    fn build_probes(config: &Config, backend: &Arc<dyn CatalogBackend>) -> Vec<Arc<dyn ServiceProbe>> {
        let method_timeout = Duration::from_secs(config.network.method_timeout_secs);
        let network = NetworkProbe::new(vec![
            Box::new(DnsCheck {
                target: config.network.dns_target.clone(),
                timeout: method_timeout,
            }),
            Box::new(HttpCheck::new(config.network.http_target.clone(), method_timeout)),
            Box::new(TcpCheck {
                addr: config.network.tcp_target.clone(),
                timeout: method_timeout,
            }),
        ]);

        let media_server: Arc<dyn ServiceProbe> = match &config.status.media_server_health_url {
            Some(url) => Arc::new(DirectHttpProbe::new(ServiceName::MediaServer, url.clone())),
            None => Arc::new(EndpointServiceProbe::new(ServiceName::MediaServer, backend.clone())),
        };

        vec![
            Arc::new(network),
            media_server,
            Arc::new(EndpointServiceProbe::new(ServiceName::LocalMedia, backend.clone())),
            Arc::new(EndpointServiceProbe::new(ServiceName::Player, backend.clone())),
        ]
    }

    async fn open_snapshot_store(config: &Config) -> Arc<dyn SnapshotStore> {
        if !config.cache.persist_snapshots {
            return Arc::new(MemorySnapshotStore::new());
        }

        let path = match &config.cache.snapshot_path {
            Some(path) => Ok(path.clone()),
            None => SqliteSnapshotStore::default_path(),
        };
        let store = match path {
            Ok(path) => SqliteSnapshotStore::open(&path).await,
            Err(e) => Err(e),
        };

        match store {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("Snapshot persistence unavailable, keeping snapshots in memory: {:#}", e);
                Arc::new(MemorySnapshotStore::new())
            }
        }
    }

    /// Start health monitoring and run the first load cycle
    pub async fn start(&self) -> Result<Vec<MediaItem>> {
        info!("Starting catalog against {}", self.config.catalog.base_url);
        self.monitor
            .start_monitoring(
                &self.config.monitored_services(),
                MonitorOptions {
                    check_immediately: true,
                },
            )
            .await;
        self.loader.start().await;

        let items = self.loader.load().await.context("Initial catalog load failed")?;
        Ok(items)
    }

    pub async fn shutdown(&self) {
        info!("Shutting down catalog");
        self.loader.shutdown().await;
        self.monitor.stop_monitoring(None).await;
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceStatusRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<BackgroundHealthMonitor> {
        &self.monitor
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryEngine> {
        &self.recovery
    }

    pub fn loader(&self) -> &Arc<ProgressiveLoader> {
        &self.loader
    }

    /// Feed this from the presentation layer's input events
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }
}
