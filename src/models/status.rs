use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Services whose health the client tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceName {
    /// General network reachability
    Internet,
    /// The remote media server (Jellyfin)
    MediaServer,
    /// Local playback (VLC)
    Player,
    /// Local media catalog
    LocalMedia,
}

impl ServiceName {
    pub const ALL: [ServiceName; 4] = [
        ServiceName::Internet,
        ServiceName::MediaServer,
        ServiceName::Player,
        ServiceName::LocalMedia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Internet => "internet",
            ServiceName::MediaServer => "media_server",
            ServiceName::Player => "player",
            ServiceName::LocalMedia => "local_media",
        }
    }

    /// Key of this service in the backend status report
    pub fn status_key(&self) -> &'static str {
        match self {
            ServiceName::Internet => "internet",
            ServiceName::MediaServer => "jellyfin",
            ServiceName::Player => "vlc",
            ServiceName::LocalMedia => "local_media",
        }
    }

    /// A service that must be reachable before this one is probed at all
    pub fn depends_on(&self) -> Option<ServiceName> {
        match self {
            ServiceName::MediaServer => Some(ServiceName::Internet),
            _ => None,
        }
    }

    /// Whether a confirmed positive probe may be reused for a while
    pub fn supports_skip_window(&self) -> bool {
        matches!(self, ServiceName::MediaServer)
    }

    pub fn parse(name: &str) -> Option<Self> {
        let lowered = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == lowered || s.status_key() == lowered)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a status was obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    Dns,
    Http,
    Socket,
    StatusEndpoint,
    /// Reused a recently confirmed result instead of probing
    SkipWindow,
    /// Dependency unavailable, the probe never ran
    Skipped,
    Manual,
    Failed,
    Timeout,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMethod::Dns => "dns",
            ProbeMethod::Http => "http",
            ProbeMethod::Socket => "socket",
            ProbeMethod::StatusEndpoint => "status_endpoint",
            ProbeMethod::SkipWindow => "skip_window",
            ProbeMethod::Skipped => "skipped",
            ProbeMethod::Manual => "manual",
            ProbeMethod::Failed => "failed",
            ProbeMethod::Timeout => "timeout",
        }
    }
}

/// Latest known health of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: ServiceName,
    pub connected: bool,
    pub last_check: DateTime<Utc>,
    pub check_duration: Duration,
    pub method: ProbeMethod,
    pub error: Option<String>,
    /// Served from the registry cache rather than a live probe
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ServiceStatus {
    pub fn connected(service: ServiceName, method: ProbeMethod, check_duration: Duration) -> Self {
        Self {
            service,
            connected: true,
            last_check: Utc::now(),
            check_duration,
            method,
            error: None,
            from_cache: false,
            metadata: HashMap::new(),
        }
    }

    pub fn disconnected(
        service: ServiceName,
        method: ProbeMethod,
        check_duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            service,
            connected: false,
            last_check: Utc::now(),
            check_duration,
            method,
            error: Some(error.into()),
            from_cache: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn was_skipped(&self) -> bool {
        self.method == ProbeMethod::Skipped
    }
}

/// Connectivity mode exposed to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityMode {
    #[default]
    Online,
    /// Network up but the media server is not answering
    Degraded,
    Offline,
}

impl ConnectivityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityMode::Online => "online",
            ConnectivityMode::Degraded => "degraded",
            ConnectivityMode::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

/// Summary derived from all known statuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall: OverallHealth,
    pub warnings: Vec<String>,
    pub services_ready: bool,
}

impl SystemHealth {
    pub fn from_statuses(statuses: &HashMap<ServiceName, ServiceStatus>) -> Self {
        let mut warnings = Vec::new();
        let up = |name: ServiceName| statuses.get(&name).map(|s| s.connected);

        match up(ServiceName::Internet) {
            Some(false) => warnings.push("No internet connectivity detected".to_string()),
            None => warnings.push("Internet connectivity not checked yet".to_string()),
            Some(true) => {}
        }
        if up(ServiceName::Internet) == Some(true) && up(ServiceName::MediaServer) == Some(false) {
            warnings.push("Media server is not responding".to_string());
        }
        if up(ServiceName::Player) == Some(false) {
            warnings.push("Local player unavailable".to_string());
        }

        let local_ok = up(ServiceName::LocalMedia) == Some(true);
        if up(ServiceName::LocalMedia) == Some(false) {
            warnings.push("Local media catalog unavailable".to_string());
        }

        let overall = if up(ServiceName::LocalMedia) == Some(false)
            && up(ServiceName::MediaServer) != Some(true)
        {
            // nothing presentable from either side
            OverallHealth::Critical
        } else if warnings.len() > 2 {
            OverallHealth::Degraded
        } else if !warnings.is_empty() {
            OverallHealth::Warning
        } else {
            OverallHealth::Healthy
        };

        let services_ready = local_ok
            && (up(ServiceName::MediaServer) == Some(true)
                || up(ServiceName::Internet) != Some(true));

        Self {
            overall,
            warnings,
            services_ready,
        }
    }
}
