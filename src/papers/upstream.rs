use async_trait::async_trait;
use serde_json::json;
use tracing::{instrument, warn};

use crate::shared::AppError;

/// Source of the papers/subjects/books catalog
#[async_trait]
pub trait UpstreamCatalog: Send + Sync {
    async fn fetch_catalog(&self) -> Result<serde_json::Value, AppError>;
}

/// Fetches the catalog from the upstream papers service over HTTP
pub struct HttpUpstreamCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstreamCatalog {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl UpstreamCatalog for HttpUpstreamCatalog {
    #[instrument(skip(self))]
    async fn fetch_catalog(&self) -> Result<serde_json::Value, AppError> {
        let url = format!("{}/catalog", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(error = %e, url = %url, "Upstream catalog fetch failed");
                AppError::Upstream("Catalog service unavailable".to_string())
            })?;

        response.json().await.map_err(|e| {
            warn!(error = %e, url = %url, "Upstream catalog returned invalid JSON");
            AppError::Upstream("Catalog service unavailable".to_string())
        })
    }
}

/// Serves a fixed catalog from memory. Used in development and tests where
/// no upstream service exists.
pub struct StaticUpstreamCatalog {
    catalog: serde_json::Value,
}

impl StaticUpstreamCatalog {
    pub fn new(catalog: serde_json::Value) -> Self {
        Self { catalog }
    }
}

impl Default for StaticUpstreamCatalog {
    fn default() -> Self {
        Self::new(json!({
            "subjects": [
                {"code": "9709", "name": "Mathematics"},
                {"code": "9702", "name": "Physics"},
                {"code": "9701", "name": "Chemistry"}
            ],
            "papers": [
                {"subject": "9709", "year": 2021, "session": "june", "paper": 1},
                {"subject": "9709", "year": 2021, "session": "november", "paper": 1}
            ],
            "books": [
                {"title": "Pure Mathematics 1", "subject": "9709"}
            ]
        }))
    }
}

#[async_trait]
impl UpstreamCatalog for StaticUpstreamCatalog {
    async fn fetch_catalog(&self) -> Result<serde_json::Value, AppError> {
        Ok(self.catalog.clone())
    }
}
