use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{MediaItem, ServiceName};

/// Body of `GET /api/media`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_metadata: Option<serde_json::Value>,
}

impl CatalogResponse {
    pub fn new(media: Vec<MediaItem>) -> Self {
        Self {
            count: media.len(),
            media,
            loading_phase: None,
            loading_metadata: None,
        }
    }
}

/// One entry of the status report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceReport {
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    /// Seconds spent by the backend on its own check
    #[serde(default)]
    pub check_duration: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// `server_url`, `paths`, `count` and whatever else the backend adds
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ServiceReport {
    pub fn is_up(&self) -> bool {
        self.connected
            .or(self.available)
            .unwrap_or_else(|| {
                matches!(
                    self.status.as_deref(),
                    Some("connected") | Some("available") | Some("online")
                )
            })
    }
}

/// Body of `GET /api/status/fast`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub services: HashMap<String, ServiceReport>,
    #[serde(default)]
    pub system_health: Option<serde_json::Value>,
    #[serde(default)]
    pub check_duration: Option<f64>,
}

impl StatusReport {
    pub fn service(&self, name: ServiceName) -> Option<&ServiceReport> {
        self.services
            .get(name.status_key())
            .or_else(|| self.services.get(name.as_str()))
    }
}
