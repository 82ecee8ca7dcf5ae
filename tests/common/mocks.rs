use async_trait::async_trait;
use rv_catalog::backends::{
    ApiError, CatalogBackend, CatalogMode, CatalogQuery, CatalogResponse, StatusReport,
};
use rv_catalog::models::{MediaItem, ProbeMethod, ServiceName, ServiceStatus};
use rv_catalog::services::status::{ReachabilityCheck, ServiceProbe};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Reply = Result<Vec<MediaItem>, ApiError>;

/// Catalog backend with scripted replies per mode
///
/// Queued replies are consumed first; once the queue is empty the fallback
/// reply is returned for every call.
#[derive(Debug)]
pub struct MockBackend {
    local: Mutex<Reply>,
    unified_queue: Mutex<VecDeque<Reply>>,
    unified: Mutex<Reply>,
    local_delay: Mutex<Option<Duration>>,
    pub local_calls: AtomicUsize,
    pub unified_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(local: Vec<MediaItem>, unified: Vec<MediaItem>) -> Self {
        Self {
            local: Mutex::new(Ok(local)),
            unified_queue: Mutex::new(VecDeque::new()),
            unified: Mutex::new(Ok(unified)),
            local_delay: Mutex::new(None),
            local_calls: AtomicUsize::new(0),
            unified_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_local(&self, error: ApiError) {
        *self.local.lock().unwrap() = Err(error);
    }

    pub fn delay_local(&self, delay: Duration) {
        *self.local_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_unified(&self, reply: Reply) {
        *self.unified.lock().unwrap() = reply;
    }

    pub fn queue_unified(&self, reply: Reply) {
        self.unified_queue.lock().unwrap().push_back(reply);
    }

    pub fn unified_calls(&self) -> usize {
        self.unified_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_catalog(&self, query: &CatalogQuery) -> Result<CatalogResponse, ApiError> {
        match query.mode {
            CatalogMode::Local => {
                self.local_calls.fetch_add(1, Ordering::SeqCst);
                let delay = *self.local_delay.lock().unwrap();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                self.local.lock().unwrap().clone().map(CatalogResponse::new)
            }
            _ => {
                self.unified_calls.fetch_add(1, Ordering::SeqCst);
                let queued = self.unified_queue.lock().unwrap().pop_front();
                queued
                    .unwrap_or_else(|| self.unified.lock().unwrap().clone())
                    .map(CatalogResponse::new)
            }
        }
    }

    async fn fetch_status(&self) -> Result<StatusReport, ApiError> {
        Ok(StatusReport::default())
    }
}

/// Probe whose answer is flipped from the test
#[derive(Debug)]
pub struct ScriptedProbe {
    service: ServiceName,
    up: AtomicBool,
    pub calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(service: ServiceName, up: bool) -> Arc<Self> {
        Arc::new(Self {
            service,
            up: AtomicBool::new(up),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceProbe for ScriptedProbe {
    fn service(&self) -> ServiceName {
        self.service
    }

    async fn probe(&self) -> ServiceStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            ServiceStatus::connected(self.service, ProbeMethod::Http, Duration::from_millis(1))
        } else {
            ServiceStatus::disconnected(
                self.service,
                ProbeMethod::Failed,
                Duration::from_millis(1),
                "scripted failure",
            )
        }
    }
}

/// Reachability check that always fails with a fixed method
#[derive(Debug)]
pub struct FailingCheck {
    pub method: ProbeMethod,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ReachabilityCheck for FailingCheck {
    fn method(&self) -> ProbeMethod {
        self.method.clone()
    }

    async fn check(&self) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("unreachable".to_string())
    }
}
