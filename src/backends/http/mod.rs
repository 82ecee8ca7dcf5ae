pub mod errors;
pub mod types;


use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::traits::{CatalogBackend, CatalogQuery};
use errors::ApiError;
use types::{CatalogResponse, StatusReport};

pub const CLIENT_PRODUCT: &str = "rv-catalog";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const MEDIA_PATH: &str = "api/media";
const STATUS_PATH: &str = "api/status/fast";

/// Headers sent with every request
pub fn standard_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert("X-Client-Product", HeaderValue::from_static(CLIENT_PRODUCT));
    headers.insert("X-Client-Version", HeaderValue::from_static(CLIENT_VERSION));
    headers
}

/// `CatalogBackend` over the catalog service's JSON endpoints
#[derive(Debug, Clone)]
pub struct HttpCatalogBackend {
    client: reqwest::Client,
    base_url: Url,
    name: String,
}

impl HttpCatalogBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        Self::with_name(base_url, timeout, "primary")
    }

    pub fn with_name(
        base_url: &str,
        timeout: Duration,
        name: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(standard_headers())
            .build()
            .map_err(ApiError::from_reqwest)?;

        Ok(Self {
            client,
            base_url: normalize_base(base_url)?,
            name: name.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    /// GET a JSON document, mapping status codes to [`ApiError`]
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        debug!("{}: GET {}", self.name, url);

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{}: {} returned {}", self.name, url, status);
            return Err(ApiError::from_status(status.as_u16(), body));
        }

        let text = response.text().await.map_err(ApiError::from_reqwest)?;
        serde_json::from_str(&text).map_err(|e| ApiError::ParseError(e.to_string()))
    }
}

/// Make sure joins append to the base path instead of replacing its last segment
fn normalize_base(base_url: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[async_trait]
impl CatalogBackend for HttpCatalogBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_catalog(&self, query: &CatalogQuery) -> Result<CatalogResponse, ApiError> {
        let url = self.build_url(MEDIA_PATH)?;
        let params = [
            ("mode", query.mode.as_str().to_string()),
            ("force_refresh", query.force_refresh.to_string()),
            ("validate_files", query.validate_files.to_string()),
        ];

        let mut response: CatalogResponse = self.get_json(url, &params).await?;
        if response.count == 0 {
            response.count = response.media.len();
        }
        debug!(
            "{}: {} catalog returned {} items",
            self.name,
            query.mode,
            response.media.len()
        );
        Ok(response)
    }

    async fn fetch_status(&self) -> Result<StatusReport, ApiError> {
        let url = self.build_url(STATUS_PATH)?;
        self.get_json(url, &[]).await
    }
}
