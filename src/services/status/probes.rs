use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::backends::CatalogBackend;
use crate::models::{ProbeMethod, ServiceName, ServiceStatus};

/// A health probe for one service. Probes never fail: problems are reported
/// as a disconnected status.
#[async_trait]
pub trait ServiceProbe: Send + Sync + std::fmt::Debug {
    fn service(&self) -> ServiceName;

    async fn probe(&self) -> ServiceStatus;
}

/// One independent way of deciding whether the network is reachable
#[async_trait]
pub trait ReachabilityCheck: Send + Sync + std::fmt::Debug {
    fn method(&self) -> ProbeMethod;

    async fn check(&self) -> Result<(), String>;
}

/// Resolve a host name
#[derive(Debug, Clone)]
pub struct DnsCheck {
    /// `host:port`, port is required by the resolver but never contacted
    pub target: String,
    pub timeout: Duration,
}

#[async_trait]
impl ReachabilityCheck for DnsCheck {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::Dns
    }

    async fn check(&self) -> Result<(), String> {
        match timeout(self.timeout, lookup_host(self.target.as_str())).await {
            Ok(Ok(mut addrs)) => addrs
                .next()
                .map(|_| ())
                .ok_or_else(|| format!("{} resolved to no addresses", self.target)),
            Ok(Err(e)) => Err(format!("resolve {}: {}", self.target, e)),
            Err(_) => Err(format!("resolve {} timed out", self.target)),
        }
    }
}

/// GET a well-known URL
#[derive(Debug, Clone)]
pub struct HttpCheck {
    client: reqwest::Client,
    pub url: String,
    pub timeout: Duration,
}

impl HttpCheck {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityCheck for HttpCheck {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::Http
    }

    async fn check(&self) -> Result<(), String> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("GET {}: {}", self.url, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("GET {} returned {}", self.url, response.status()))
        }
    }
}

/// Open a raw TCP connection
#[derive(Debug, Clone)]
pub struct TcpCheck {
    pub addr: String,
    pub timeout: Duration,
}

#[async_trait]
impl ReachabilityCheck for TcpCheck {
    fn method(&self) -> ProbeMethod {
        ProbeMethod::Socket
    }

    async fn check(&self) -> Result<(), String> {
        match timeout(self.timeout, TcpStream::connect(self.addr.as_str())).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(format!("connect {}: {}", self.addr, e)),
            Err(_) => Err(format!("connect {} timed out", self.addr)),
        }
    }
}

/// Network reachability: checks run in order, the first success wins
#[derive(Debug)]
pub struct NetworkProbe {
    checks: Vec<Box<dyn ReachabilityCheck>>,
}

impl NetworkProbe {
    pub fn new(checks: Vec<Box<dyn ReachabilityCheck>>) -> Self {
        Self { checks }
    }

    pub fn methods(&self) -> Vec<ProbeMethod> {
        self.checks.iter().map(|c| c.method()).collect()
    }
}

#[async_trait]
impl ServiceProbe for NetworkProbe {
    fn service(&self) -> ServiceName {
        ServiceName::Internet
    }

    async fn probe(&self) -> ServiceStatus {
        let start = Instant::now();
        let mut errors = Vec::with_capacity(self.checks.len());

        for check in &self.checks {
            match check.check().await {
                Ok(()) => {
                    debug!(
                        "Internet reachable via {} in {:?}",
                        check.method().as_str(),
                        start.elapsed()
                    );
                    return ServiceStatus::connected(
                        ServiceName::Internet,
                        check.method(),
                        start.elapsed(),
                    );
                }
                Err(e) => {
                    trace!("Reachability check {} failed: {}", check.method().as_str(), e);
                    errors.push(format!("{}: {}", check.method().as_str(), e));
                }
            }
        }

        let error = if errors.is_empty() {
            "no reachability checks configured".to_string()
        } else {
            errors.join("; ")
        };
        ServiceStatus::disconnected(
            ServiceName::Internet,
            ProbeMethod::Failed,
            start.elapsed(),
            error,
        )
    }
}

/// Reads one service's entry from the backend status report
#[derive(Debug, Clone)]
pub struct EndpointServiceProbe {
    service: ServiceName,
    backend: Arc<dyn CatalogBackend>,
}

impl EndpointServiceProbe {
    pub fn new(service: ServiceName, backend: Arc<dyn CatalogBackend>) -> Self {
        Self { service, backend }
    }
}

#[async_trait]
impl ServiceProbe for EndpointServiceProbe {
    fn service(&self) -> ServiceName {
        self.service
    }

    async fn probe(&self) -> ServiceStatus {
        let start = Instant::now();

        let report = match self.backend.fetch_status().await {
            Ok(report) => report,
            Err(e) => {
                return ServiceStatus::disconnected(
                    self.service,
                    ProbeMethod::Failed,
                    start.elapsed(),
                    format!("status endpoint: {}", e),
                );
            }
        };

        let Some(entry) = report.service(self.service) else {
            return ServiceStatus::disconnected(
                self.service,
                ProbeMethod::StatusEndpoint,
                start.elapsed(),
                format!("status report has no '{}' entry", self.service.status_key()),
            );
        };

        let mut status = if entry.is_up() {
            ServiceStatus::connected(self.service, ProbeMethod::StatusEndpoint, start.elapsed())
        } else {
            ServiceStatus::disconnected(
                self.service,
                ProbeMethod::StatusEndpoint,
                start.elapsed(),
                entry
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "reported unavailable".to_string()),
            )
        };
        status.metadata = entry.extra.clone();
        if let Some(state) = &entry.status {
            status
                .metadata
                .insert("status".to_string(), serde_json::json!(state));
        }
        status
    }
}

/// Hits a service's own health URL, e.g. the media server's public info
#[derive(Debug, Clone)]
pub struct DirectHttpProbe {
    service: ServiceName,
    client: reqwest::Client,
    url: String,
}

impl DirectHttpProbe {
    pub fn new(service: ServiceName, url: impl Into<String>) -> Self {
        Self {
            service,
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ServiceProbe for DirectHttpProbe {
    fn service(&self) -> ServiceName {
        self.service
    }

    async fn probe(&self) -> ServiceStatus {
        let start = Instant::now();
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => {
                ServiceStatus::connected(self.service, ProbeMethod::Http, start.elapsed())
                    .with_metadata("server_url", serde_json::json!(self.url))
            }
            Ok(response) => ServiceStatus::disconnected(
                self.service,
                ProbeMethod::Http,
                start.elapsed(),
                format!("{} returned {}", self.url, response.status()),
            ),
            Err(e) => ServiceStatus::disconnected(
                self.service,
                ProbeMethod::Failed,
                start.elapsed(),
                format!("{}: {}", self.url, e),
            ),
        }
    }
}
