use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::models::ServiceName;
use crate::services::consistency::MergeStrategy;
use crate::services::loader::LoaderSettings;
use crate::services::monitor::MonitorSettings;
use crate::services::recovery::{RecoverySettings, RetryPolicy};
use crate::services::snapshot_store::SnapshotFreshness;
use crate::services::status::StatusSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Tried when the primary endpoint is unreachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_url: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_dns_target")]
    pub dns_target: String,

    #[serde(default = "default_http_target")]
    pub http_target: String,

    #[serde(default = "default_tcp_target")]
    pub tcp_target: String,

    #[serde(default = "default_method_timeout")]
    pub method_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_skip_window")]
    pub skip_window_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub default_timeout_secs: u64,

    /// Per-service overrides keyed by service name
    #[serde(default = "default_probe_timeouts")]
    pub probe_timeouts_secs: HashMap<String, u64>,

    /// Probe the media server directly instead of through the status endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_server_health_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_stable_threshold")]
    pub stable_threshold: u32,

    #[serde(default = "default_unstable_threshold")]
    pub unstable_threshold: u32,

    #[serde(default = "default_slow_interval")]
    pub slow_interval_secs: u64,

    #[serde(default = "default_normal_interval")]
    pub normal_interval_secs: u64,

    #[serde(default = "default_fast_interval")]
    pub fast_interval_secs: u64,

    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,

    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_idle_interval")]
    pub idle_interval_secs: u64,

    #[serde(default = "default_idle_check")]
    pub idle_check_secs: u64,

    #[serde(default = "default_monitored")]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_local_timeout")]
    pub local_timeout_secs: u64,

    #[serde(default = "default_max_background")]
    pub max_background_secs: u64,

    #[serde(default = "default_true")]
    pub remote_enabled: bool,

    #[serde(default)]
    pub merge_strategy: MergeStrategyConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategyConfig {
    #[default]
    Additive,
    AdditiveNoEnhance,
    Replace,
    ReplacePreferRemote,
    Enhance,
}

impl From<MergeStrategyConfig> for MergeStrategy {
    fn from(value: MergeStrategyConfig) -> Self {
        match value {
            MergeStrategyConfig::Additive => MergeStrategy::Additive { enhance: true },
            MergeStrategyConfig::AdditiveNoEnhance => MergeStrategy::Additive { enhance: false },
            MergeStrategyConfig::Replace => MergeStrategy::Replace {
                prioritize_local: true,
            },
            MergeStrategyConfig::ReplacePreferRemote => MergeStrategy::Replace {
                prioritize_local: false,
            },
            MergeStrategyConfig::Enhance => MergeStrategy::Enhance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_fallback_ttl")]
    pub fallback_ttl_secs: u64,

    #[serde(default = "default_failure_threshold")]
    pub service_failure_threshold: u32,

    #[serde(default = "default_recovery_probe")]
    pub recovery_probe_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Snapshot database; defaults to the user cache directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub persist_snapshots: bool,

    #[serde(default = "default_local_freshness")]
    pub local_freshness_secs: u64,

    #[serde(default = "default_remote_freshness")]
    pub remote_freshness_secs: u64,

    #[serde(default = "default_remote_freshness")]
    pub unified_freshness_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            info!("No config file found, using defaults");
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        info!("Config loaded successfully");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("rv-catalog").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.base_url.trim().is_empty() {
            bail!("catalog.base_url must not be empty");
        }
        if self.catalog.request_timeout_secs == 0 || self.loader.local_timeout_secs == 0 {
            bail!("request and local timeouts must be greater than zero");
        }
        if self.status.default_timeout_secs == 0 || self.network.method_timeout_secs == 0 {
            bail!("probe timeouts must be greater than zero");
        }
        for name in self.status.probe_timeouts_secs.keys() {
            if ServiceName::parse(name).is_none() {
                bail!("status.probe_timeouts_secs: unknown service '{}'", name);
            }
        }
        for name in &self.monitor.services {
            if ServiceName::parse(name).is_none() {
                bail!("monitor.services: unknown service '{}'", name);
            }
        }

        let m = &self.monitor;
        if m.min_interval_secs == 0 || m.min_interval_secs > m.max_interval_secs {
            bail!(
                "monitor interval bounds are inconsistent: min {}s, max {}s",
                m.min_interval_secs,
                m.max_interval_secs
            );
        }
        if m.stable_threshold == 0 || m.unstable_threshold == 0 {
            bail!("monitor thresholds must be at least 1");
        }

        let r = &self.retry;
        if !r.multiplier.is_finite() || r.multiplier < 1.0 {
            bail!("retry.multiplier must be >= 1.0, got {}", r.multiplier);
        }
        if r.base_delay_ms > r.max_delay_ms {
            bail!("retry.base_delay_ms exceeds retry.max_delay_ms");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.request_timeout_secs)
    }

    pub fn status_settings(&self) -> StatusSettings {
        let probe_timeouts = self
            .status
            .probe_timeouts_secs
            .iter()
            .filter_map(|(name, secs)| {
                ServiceName::parse(name).map(|service| (service, Duration::from_secs(*secs)))
            })
            .collect();

        StatusSettings {
            cache_ttl: Duration::from_secs(self.status.cache_ttl_secs),
            skip_window: Duration::from_secs(self.status.skip_window_secs),
            default_timeout: Duration::from_secs(self.status.default_timeout_secs),
            probe_timeouts,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        let m = &self.monitor;
        MonitorSettings {
            stable_threshold: m.stable_threshold,
            unstable_threshold: m.unstable_threshold,
            slow_interval: Duration::from_secs(m.slow_interval_secs),
            normal_interval: Duration::from_secs(m.normal_interval_secs),
            fast_interval: Duration::from_secs(m.fast_interval_secs),
            min_interval: Duration::from_secs(m.min_interval_secs),
            max_interval: Duration::from_secs(m.max_interval_secs),
            idle_timeout: Duration::from_secs(m.idle_timeout_secs),
            idle_interval: Duration::from_secs(m.idle_interval_secs),
            idle_check_interval: Duration::from_secs(m.idle_check_secs),
        }
    }

    pub fn monitored_services(&self) -> Vec<ServiceName> {
        self.monitor
            .services
            .iter()
            .filter_map(|name| ServiceName::parse(name))
            .collect()
    }

    pub fn snapshot_freshness(&self) -> SnapshotFreshness {
        SnapshotFreshness {
            local: Duration::from_secs(self.cache.local_freshness_secs),
            remote: Duration::from_secs(self.cache.remote_freshness_secs),
            unified: Duration::from_secs(self.cache.unified_freshness_secs),
        }
    }

    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            local_timeout: Duration::from_secs(self.loader.local_timeout_secs),
            max_background_duration: Duration::from_secs(self.loader.max_background_secs),
            remote_enabled: self.loader.remote_enabled,
            merge_strategy: self.loader.merge_strategy.into(),
            freshness: self.snapshot_freshness(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.base_delay_ms,
            self.retry.multiplier,
            self.retry.max_delay_ms,
        )
    }

    pub fn recovery_settings(&self) -> RecoverySettings {
        RecoverySettings {
            fallback_ttl: Duration::from_secs(self.recovery.fallback_ttl_secs),
            service_failure_threshold: self.recovery.service_failure_threshold,
            recovery_probe_interval: Duration::from_secs(self.recovery.recovery_probe_secs),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            alternate_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            dns_target: default_dns_target(),
            http_target: default_http_target(),
            tcp_target: default_tcp_target(),
            method_timeout_secs: default_method_timeout(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_status_ttl(),
            skip_window_secs: default_skip_window(),
            default_timeout_secs: default_probe_timeout(),
            probe_timeouts_secs: default_probe_timeouts(),
            media_server_health_url: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stable_threshold: default_stable_threshold(),
            unstable_threshold: default_unstable_threshold(),
            slow_interval_secs: default_slow_interval(),
            normal_interval_secs: default_normal_interval(),
            fast_interval_secs: default_fast_interval(),
            min_interval_secs: default_min_interval(),
            max_interval_secs: default_max_interval(),
            idle_timeout_secs: default_idle_timeout(),
            idle_interval_secs: default_idle_interval(),
            idle_check_secs: default_idle_check(),
            services: default_monitored(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            local_timeout_secs: default_local_timeout(),
            max_background_secs: default_max_background(),
            remote_enabled: default_true(),
            merge_strategy: MergeStrategyConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retries(),
            base_delay_ms: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            fallback_ttl_secs: default_fallback_ttl(),
            service_failure_threshold: default_failure_threshold(),
            recovery_probe_secs: default_recovery_probe(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            persist_snapshots: default_true(),
            local_freshness_secs: default_local_freshness(),
            remote_freshness_secs: default_remote_freshness(),
            unified_freshness_secs: default_remote_freshness(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_base_url() -> String { "http://localhost:8096".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_dns_target() -> String { "one.one.one.one:53".to_string() }
fn default_http_target() -> String { "https://www.gstatic.com/generate_204".to_string() }
fn default_tcp_target() -> String { "8.8.8.8:53".to_string() }
fn default_method_timeout() -> u64 { 3 }
fn default_status_ttl() -> u64 { 30 }
fn default_skip_window() -> u64 { 300 }
fn default_probe_timeout() -> u64 { 5 }
fn default_probe_timeouts() -> HashMap<String, u64> {
    HashMap::from([
        ("internet".to_string(), 3),
        ("media_server".to_string(), 5),
        ("player".to_string(), 3),
        ("local_media".to_string(), 5),
    ])
}
fn default_stable_threshold() -> u32 { 5 }
fn default_unstable_threshold() -> u32 { 3 }
fn default_slow_interval() -> u64 { 120 }
fn default_normal_interval() -> u64 { 60 }
fn default_fast_interval() -> u64 { 15 }
fn default_min_interval() -> u64 { 10 }
fn default_max_interval() -> u64 { 600 }
fn default_idle_timeout() -> u64 { 600 }
fn default_idle_interval() -> u64 { 300 }
fn default_idle_check() -> u64 { 30 }
fn default_monitored() -> Vec<String> {
    vec!["internet".to_string(), "media_server".to_string()]
}
fn default_local_timeout() -> u64 { 5 }
fn default_max_background() -> u64 { 30 }
fn default_retries() -> u32 { 3 }
fn default_base_delay() -> u64 { 1000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_delay() -> u64 { 30_000 }
fn default_fallback_ttl() -> u64 { 300 }
fn default_failure_threshold() -> u32 { 3 }
fn default_recovery_probe() -> u64 { 30 }
fn default_local_freshness() -> u64 { 30 * 60 }
fn default_remote_freshness() -> u64 { 10 * 60 }
