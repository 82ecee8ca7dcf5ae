use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::http::errors::ApiError;
use super::http::types::{CatalogResponse, StatusReport};

/// Source selector understood by the catalog endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogMode {
    Local,
    Remote,
    Unified,
}

impl CatalogMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogMode::Local => "local",
            CatalogMode::Remote => "remote",
            CatalogMode::Unified => "unified",
        }
    }
}

impl fmt::Display for CatalogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogQuery {
    pub mode: CatalogMode,
    pub force_refresh: bool,
    pub validate_files: bool,
}

impl CatalogQuery {
    /// Fast local listing: file validation off
    pub fn local() -> Self {
        Self {
            mode: CatalogMode::Local,
            force_refresh: false,
            validate_files: false,
        }
    }

    pub fn unified() -> Self {
        Self {
            mode: CatalogMode::Unified,
            force_refresh: false,
            validate_files: false,
        }
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_validate_files(mut self, validate: bool) -> Self {
        self.validate_files = validate;
        self
    }
}

/// The catalog/status backend the client talks to
#[async_trait]
pub trait CatalogBackend: Send + Sync + fmt::Debug {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    async fn fetch_catalog(&self, query: &CatalogQuery) -> Result<CatalogResponse, ApiError>;

    async fn fetch_status(&self) -> Result<StatusReport, ApiError>;
}
